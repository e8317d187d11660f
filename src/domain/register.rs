// 寄存器模型：bank + 下标的标识、语义类型、换算管线与单位合理性校验
use std::fmt;

use chrono::NaiveTime;

use crate::domain::register_schema;
use crate::error::Error;

/// 寄存器标识。同一下标在不同 bank 之间不相等。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    /// 保持寄存器（可读写配置）
    Holding(u16),
    /// 输入寄存器（只读遥测）
    Input(u16),
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::Holding(i) => write!(f, "HR:{i}"),
            Register::Input(i) => write!(f, "IR:{i}"),
        }
    }
}

impl Register {
    pub fn index(&self) -> u16 {
        match self {
            Register::Holding(i) | Register::Input(i) => *i,
        }
    }

    /// 寄存器表中的描述符；未定义的下标返回 None
    pub fn definition(&self) -> Option<RegisterDef> {
        match self {
            Register::Holding(i) => register_schema::holding_def(*i),
            Register::Input(i) => register_schema::input_def(*i),
        }
    }

    pub fn write_safe(&self) -> bool {
        match self {
            Register::Holding(i) => register_schema::is_write_safe(*i),
            Register::Input(_) => false,
        }
    }

    /// 原始值 -> 语义值。类型转换失败返回 RegisterValue，
    /// 数值超出单位合理范围返回 RegisterNotSane。
    pub fn convert(&self, raw: u16) -> Result<Value, Error> {
        let def = self.definition().ok_or_else(|| Error::RegisterValue {
            register: *self,
            value: raw,
            reason: "未定义的寄存器下标".to_string(),
        })?;
        let value = def
            .data_type
            .convert(raw, def.scaling)
            .map_err(|reason| Error::RegisterValue {
                register: *self,
                value: raw,
                reason,
            })?;
        if let Some(x) = value.as_f64() {
            if !def.unit.sane(x) {
                return Err(Error::RegisterNotSane {
                    register: *self,
                    value: raw,
                });
            }
        }
        Ok(value)
    }

    /// 解析 "HR:20" / "IR:60"，兼容旧格式 "HR(20)" / "IR(60)"
    pub fn parse(s: &str) -> Option<Register> {
        let (bank, index) = if let Some((bank, rest)) = s.split_once(':') {
            (bank, rest)
        } else if let Some((bank, rest)) = s.split_once('(') {
            (bank, rest.strip_suffix(')')?)
        } else {
            return None;
        };
        let index: u16 = index.trim().parse().ok()?;
        match bank.trim() {
            "HR" | "HoldingRegister" => Some(Register::Holding(index)),
            "IR" | "InputRegister" => Some(Register::Input(index)),
            _ => None,
        }
    }
}

/// 寄存器字的语义类型；编码一律大端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Bool,
    Bitfield,
    Hex,
    /// 低字节有效
    Uint8,
    /// 一个字装两个 u8
    Duint8,
    Uint16,
    /// 16 位二补码
    Int16,
    /// 32 位大端整数的高字
    Uint32High,
    /// 32 位大端整数的低字
    Uint32Low,
    /// 两个 latin-1 字符
    Ascii,
    /// BCD 时刻：HHMM 十进制；24 归零、60 归零，越界报错
    Time,
    /// 零点在 10000，除以 10000
    PowerFactor,
}

impl DataType {
    /// 按类型与缩放（除数）换算原始值
    pub fn convert(&self, raw: u16, scaling: u16) -> Result<Value, String> {
        match self {
            DataType::Uint32High => {
                let v = (raw as u32) << 16;
                if scaling != 1 {
                    Ok(Value::F64(v as f64 / scaling as f64))
                } else {
                    Ok(Value::U32(v))
                }
            }
            DataType::Int16 => {
                let v = raw as i16;
                if scaling != 1 {
                    Ok(Value::F64(v as f64 / scaling as f64))
                } else {
                    Ok(Value::I16(v))
                }
            }
            DataType::Bool => Ok(Value::Bool(raw != 0)),
            DataType::Time => {
                let hour = raw / 100;
                let minute = raw % 100;
                if hour > 24 || minute > 60 {
                    return Err(format!("{raw:04} 不是合法的 BCD 时刻"));
                }
                let hour = if hour == 24 { 0 } else { hour };
                let minute = if minute == 60 { 0 } else { minute };
                NaiveTime::from_hms_opt(hour as u32, minute as u32, 0)
                    .map(Value::Time)
                    .ok_or_else(|| format!("{raw:04} 不是合法的 BCD 时刻"))
            }
            DataType::Ascii => {
                let hi = (raw >> 8) as u8 as char;
                let lo = (raw & 0xff) as u8 as char;
                Ok(Value::Ascii(format!("{hi}{lo}")))
            }
            DataType::Uint8 => Ok(Value::U8((raw & 0xff) as u8)),
            DataType::Duint8 => Ok(Value::Duint8((raw >> 8) as u8, (raw & 0xff) as u8)),
            DataType::PowerFactor => Ok(Value::F64((raw as f64 - 10_000.0) / 10_000.0)),
            DataType::Bitfield => Ok(Value::Bitfield(raw)),
            DataType::Hex => Ok(Value::Hex(format!("{raw:04x}"))),
            DataType::Uint16 | DataType::Uint32Low => {
                if scaling != 1 {
                    Ok(Value::F64(raw as f64 / scaling as f64))
                } else {
                    Ok(Value::U16(raw))
                }
            }
        }
    }
}

/// 换算后的语义值
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    I16(i16),
    F64(f64),
    Duint8(u8, u8),
    Ascii(String),
    Hex(String),
    Bitfield(u16),
    Time(NaiveTime),
}

impl Value {
    /// 数值视图；合理性校验只作用于数值类型
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::U8(v) => Some(*v as f64),
            Value::U16(v) => Some(*v as f64),
            Value::U32(v) => Some(*v as f64),
            Value::I16(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::U8(v) => write!(f, "{v}"),
            Value::U16(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::I16(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v:.2}"),
            Value::Duint8(a, b) => write!(f, "{a}, {b}"),
            Value::Ascii(s) => write!(f, "{s}"),
            Value::Hex(s) => write!(f, "0x{s}"),
            // 按 4 位一组的二进制展示位域
            Value::Bitfield(v) => write!(
                f,
                "{:04b} {:04b} {:04b} {:04b}",
                (v >> 12) & 0xf,
                (v >> 8) & 0xf,
                (v >> 4) & 0xf,
                v & 0xf
            ),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M")),
        }
    }
}

/// 物理单位及其合理范围；超出视为寄存器损坏
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    None,
    ChargeAh,
    CurrentA,
    CurrentMa,
    EnergyKwh,
    FrequencyHz,
    Percent,
    PowerKw,
    PowerVa,
    PowerW,
    TemperatureC,
    TimeMin,
    TimeMs,
    TimeS,
    VoltageV,
}

impl Unit {
    pub fn sane(&self, x: f64) -> bool {
        match self {
            Unit::CurrentA => x.abs() < 200.0,
            Unit::CurrentMa => x.abs() < 2000.0,
            Unit::EnergyKwh => x >= 0.0,
            Unit::FrequencyHz => (0.0..100.0).contains(&x),
            Unit::Percent => (0.0..256.0).contains(&x),
            Unit::PowerKw => x.abs() < 20.0,
            Unit::PowerVa => x.abs() < 20000.0,
            Unit::PowerW => x.abs() < 20000.0,
            Unit::TemperatureC => x.abs() < 200.0,
            Unit::VoltageV => x.abs() < 2000.0,
            _ => true,
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Unit::None => "",
            Unit::ChargeAh => "Ah",
            Unit::CurrentA => "A",
            Unit::CurrentMa => "mA",
            Unit::EnergyKwh => "kWh",
            Unit::FrequencyHz => "Hz",
            Unit::Percent => "%",
            Unit::PowerKw => "kW",
            Unit::PowerVa => "VA",
            Unit::PowerW => "W",
            Unit::TemperatureC => "°C",
            Unit::TimeMin => "min",
            Unit::TimeMs => "ms",
            Unit::TimeS => "sec",
            Unit::VoltageV => "V",
        }
    }
}

/// 单个寄存器的静态描述符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDef {
    pub data_type: DataType,
    /// 十进制除数：1 / 10 / 100 / 1000
    pub scaling: u16,
    pub unit: Unit,
    pub write_safe: bool,
}
