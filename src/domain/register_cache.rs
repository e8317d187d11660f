// 寄存器缓存：按 bank+下标存放原始 16 位值。
// 批量更新整体成败：任一值换算或合理性校验失败则整批拒绝，缓存保持原样。
use std::collections::BTreeMap;

use serde_json::{Map, Value as JsonValue};

use crate::domain::register::{Register, Value};
use crate::domain::timeslot::TimeSlot;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterCache {
    registers: BTreeMap<Register, u16>,
}

impl RegisterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// 原始值
    pub fn get(&self, register: Register) -> Option<u16> {
        self.registers.get(&register).copied()
    }

    /// 校验后整批写入；任一失败则整批拒绝并返回聚合错误
    pub fn bulk_update(&mut self, entries: &[(Register, u16)]) -> Result<()> {
        let mut errors = Vec::new();
        for (register, raw) in entries {
            if let Err(e) = register.convert(*raw) {
                errors.push(e);
            }
        }
        if !errors.is_empty() {
            return Err(Error::UpdateFailed { errors });
        }
        for (register, raw) in entries {
            self.registers.insert(*register, *raw);
        }
        Ok(())
    }

    /// JSON 持久化，键形如 "HR:20" / "IR:60"
    pub fn to_json(&self) -> String {
        let mut map = Map::new();
        for (register, raw) in &self.registers {
            map.insert(register.to_string(), JsonValue::from(*raw));
        }
        JsonValue::Object(map).to_string()
    }

    /// 从 JSON 恢复；兼容旧键格式 "HR(20)"。载入同样走整批校验。
    pub fn from_json(data: &str) -> Result<Self> {
        let parsed: JsonValue =
            serde_json::from_str(data).map_err(|e| Error::Communication(format!("JSON 解析失败: {e}")))?;
        let obj = parsed
            .as_object()
            .ok_or_else(|| Error::Communication("JSON 顶层必须是对象".to_string()))?;
        let mut entries = Vec::with_capacity(obj.len());
        for (key, value) in obj {
            let register = Register::parse(key).ok_or_else(|| Error::Communication(format!(
                "{key} 不是合法的寄存器键"
            )))?;
            let raw = value
                .as_u64()
                .filter(|v| *v <= u16::MAX as u64)
                .ok_or_else(|| Error::Communication(format!("{key} 的值不是 16 位无符号整数")))?;
            entries.push((register, raw as u16));
        }
        let mut cache = Self::new();
        cache.bulk_update(&entries)?;
        Ok(cache)
    }

    /// 拼接 ASCII 寄存器对；任一缺失返回 None，NUL 结果剥除
    pub fn to_string_value(&self, registers: &[Register]) -> Option<String> {
        let mut out = String::with_capacity(registers.len() * 2);
        for r in registers {
            let raw = self.get(*r)?;
            out.push((raw >> 8) as u8 as char);
            out.push((raw & 0xff) as u8 as char);
        }
        Some(out.trim_matches('\0').to_string())
    }

    /// 拼接 4 位十六进制表示；任一缺失返回 None
    pub fn to_hex_string(&self, registers: &[Register]) -> Option<String> {
        let mut out = String::with_capacity(registers.len() * 4);
        for r in registers {
            out.push_str(&format!("{:04x}", self.get(*r)?));
        }
        Some(out)
    }

    /// 高低字拼成 u32
    pub fn to_uint32(&self, high: Register, low: Register) -> Option<u32> {
        Some(((self.get(high)? as u32) << 16) | self.get(low)? as u32)
    }

    /// 高低字拼 u32 后按低字寄存器的缩放折算
    pub fn to_scaled_uint32(&self, high: Register, low: Register) -> Option<f64> {
        let combined = self.to_uint32(high, low)? as f64;
        let scaling = low.definition()?.scaling as f64;
        Some(combined / scaling)
    }

    pub fn to_duint8(&self, register: Register) -> Option<(u8, u8)> {
        let raw = self.get(register)?;
        Some(((raw >> 8) as u8, (raw & 0xff) as u8))
    }

    pub fn to_timeslot(&self, start: Register, end: Register) -> Option<TimeSlot> {
        TimeSlot::from_repr(self.get(start)?, self.get(end)?)
    }

    /// 按描述符换算为数值（含缩放与二补码）
    pub fn to_f64(&self, register: Register) -> Option<f64> {
        register.convert(self.get(register)?).ok()?.as_f64()
    }

    pub fn to_bool(&self, register: Register) -> Option<bool> {
        match register.convert(self.get(register)?).ok()? {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn to_i16(&self, register: Register) -> Option<i16> {
        match register.convert(self.get(register)?).ok()? {
            Value::I16(v) => Some(v),
            _ => None,
        }
    }

    pub fn to_time(&self, register: Register) -> Option<chrono::NaiveTime> {
        match register.convert(self.get(register)?).ok()? {
            Value::Time(t) => Some(t),
            _ => None,
        }
    }
}
