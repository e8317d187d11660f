// 数据模型模块

pub mod battery;
pub mod inverter;
pub mod plant;
pub mod register;
pub mod register_cache;
pub mod register_schema;
pub mod timeslot;
