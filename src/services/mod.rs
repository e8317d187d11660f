// 协议与会话服务模块

pub mod codec;
pub mod framer;
pub mod modbus_client;
pub mod pdu;
