// 充放电时段：一对 BCD TIME 寄存器组成的 {start, end}
use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeSlot {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn from_components(
        start_hour: u32,
        start_minute: u32,
        end_hour: u32,
        end_minute: u32,
    ) -> Option<Self> {
        Some(Self {
            start: NaiveTime::from_hms_opt(start_hour, start_minute, 0)?,
            end: NaiveTime::from_hms_opt(end_hour, end_minute, 0)?,
        })
    }

    /// 从寄存器表示构造：1600 -> 16:00。24 时 / 60 分与寄存器换算同规则归零。
    pub fn from_repr(start: u16, end: u16) -> Option<Self> {
        Some(Self {
            start: parse_bcd(start)?,
            end: parse_bcd(end)?,
        })
    }

    /// 写寄存器时的表示：16:00 -> 1600
    pub fn start_repr(&self) -> u16 {
        (self.start.hour() * 100 + self.start.minute()) as u16
    }

    pub fn end_repr(&self) -> u16 {
        (self.end.hour() * 100 + self.end.minute()) as u16
    }
}

fn parse_bcd(raw: u16) -> Option<NaiveTime> {
    let hour = raw / 100;
    let minute = raw % 100;
    if hour > 24 || minute > 60 {
        return None;
    }
    let hour = if hour == 24 { 0 } else { hour };
    let minute = if minute == 60 { 0 } else { minute };
    NaiveTime::from_hms_opt(hour as u32, minute as u32, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_repr_round_trip() {
        let slot = TimeSlot::from_repr(1600, 700).unwrap();
        assert_eq!(slot.start, NaiveTime::from_hms_opt(16, 0, 0).unwrap());
        assert_eq!(slot.end, NaiveTime::from_hms_opt(7, 0, 0).unwrap());
        assert_eq!(slot.start_repr(), 1600);
        assert_eq!(slot.end_repr(), 700);
    }

    #[test]
    fn from_repr_rejects_invalid() {
        assert!(TimeSlot::from_repr(2500, 0).is_none());
        assert!(TimeSlot::from_repr(0, 1299).is_none());
    }

    #[test]
    fn from_repr_collapses_wrap_values() {
        let slot = TimeSlot::from_repr(2400, 1860).unwrap();
        assert_eq!(slot.start, NaiveTime::from_hms_opt(0, 0, 0).unwrap());
        assert_eq!(slot.end, NaiveTime::from_hms_opt(18, 0, 0).unwrap());
    }
}
