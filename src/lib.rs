// GivEnergy 逆变器 Modbus/TCP 厂商方言客户端。
// 维持到数据适配器的长连接，周期轮询寄存器段刷新电站模型，
// 并通过保持寄存器写入下发控制命令。

pub mod commands;
pub mod domain;
pub mod error;
pub mod services;

pub use domain::battery::Battery;
pub use domain::inverter::Inverter;
pub use domain::plant::Plant;
pub use domain::register::Register;
pub use domain::register_cache::RegisterCache;
pub use domain::timeslot::TimeSlot;
pub use error::{Error, Result};
pub use services::modbus_client::{ModbusClient, ModbusClientConfig};
pub use services::pdu::{Pdu, TransparentRequest, TransparentResponse};
