// 控制命令：具名操作展开为发往逆变器从机（0x11）的有序写请求序列。
// 参数越界在组装时即以 InvalidPduState 拒绝，不会有任何字节出网。
use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::domain::register_schema::holding;
use crate::domain::timeslot::TimeSlot;
use crate::error::{Error, Result};
use crate::services::pdu::TransparentRequest;

fn write(register: u16, value: u16) -> TransparentRequest {
    TransparentRequest::write_holding_register(register, value)
}

fn ensure_range(name: &str, value: u16, min: u16, max: u16) -> Result<()> {
    if value < min || value > max {
        return Err(Error::InvalidPduState {
            reason: format!("{name} ({value}) 必须在 [{min},{max}] 内"),
            quirk: false,
        });
    }
    Ok(())
}

/// 允许电池充电（受模式与时段约束）
pub fn enable_charge() -> TransparentRequest {
    write(holding::ENABLE_CHARGE, 1)
}

/// 完全禁止电池充电
pub fn disable_charge() -> TransparentRequest {
    write(holding::ENABLE_CHARGE, 0)
}

/// 允许电池放电（受模式与时段约束）
pub fn enable_discharge() -> TransparentRequest {
    write(holding::ENABLE_DISCHARGE, 1)
}

/// 完全禁止电池放电
pub fn disable_discharge() -> TransparentRequest {
    write(holding::ENABLE_DISCHARGE, 0)
}

/// 放电时以最大功率出口
pub fn set_discharge_mode_max_power() -> TransparentRequest {
    write(holding::BATTERY_POWER_MODE, 0)
}

/// 放电时仅匹配本地需求，不出口
pub fn set_discharge_mode_demand() -> TransparentRequest {
    write(holding::BATTERY_POWER_MODE, 1)
}

/// 解除充电目标限制并将目标归位 100%
pub fn disable_charge_target() -> Vec<TransparentRequest> {
    vec![
        write(holding::ENABLE_CHARGE_TARGET, 0),
        write(holding::CHARGE_TARGET_SOC, 100),
    ]
}

/// 充到目标 SOC 即停（俗称冬季模式）；目标 100% 等价于解除限制
pub fn set_charge_target(target_soc: u16) -> Result<Vec<TransparentRequest>> {
    ensure_range("充电目标 SOC", target_soc, 4, 100)?;
    let mut requests = vec![enable_charge()];
    if target_soc == 100 {
        requests.extend(disable_charge_target());
    } else {
        requests.push(write(holding::ENABLE_CHARGE_TARGET, 1));
        requests.push(write(holding::CHARGE_TARGET_SOC, target_soc));
    }
    Ok(requests)
}

/// 保持的最低电量（浅充下限）
pub fn set_shallow_charge(val: u16) -> Result<TransparentRequest> {
    ensure_range("浅充下限", val, 4, 100)?;
    Ok(write(holding::BATTERY_SOC_RESERVE, val))
}

/// 充电功率百分比上限；多数机型 50% 即满额
pub fn set_battery_charge_limit(val: u16) -> Result<TransparentRequest> {
    ensure_range("充电功率上限", val, 0, 50)?;
    Ok(write(holding::BATTERY_CHARGE_LIMIT, val))
}

/// 放电功率百分比上限；多数机型 50% 即满额
pub fn set_battery_discharge_limit(val: u16) -> Result<TransparentRequest> {
    ensure_range("放电功率上限", val, 0, 50)?;
    Ok(write(holding::BATTERY_DISCHARGE_LIMIT, val))
}

/// 放电保留的功率下限
pub fn set_battery_power_reserve(val: u16) -> Result<TransparentRequest> {
    ensure_range("功率保留", val, 4, 100)?;
    Ok(write(holding::BATTERY_DISCHARGE_MIN_POWER_RESERVE, val))
}

fn set_slot(start_register: u16, end_register: u16, slot: Option<TimeSlot>) -> Vec<TransparentRequest> {
    match slot {
        Some(slot) => vec![
            write(start_register, slot.start_repr()),
            write(end_register, slot.end_repr()),
        ],
        None => vec![write(start_register, 0), write(end_register, 0)],
    }
}

pub fn set_charge_slot_1(slot: TimeSlot) -> Vec<TransparentRequest> {
    set_slot(holding::CHARGE_SLOT_1_START, holding::CHARGE_SLOT_1_END, Some(slot))
}

pub fn reset_charge_slot_1() -> Vec<TransparentRequest> {
    set_slot(holding::CHARGE_SLOT_1_START, holding::CHARGE_SLOT_1_END, None)
}

pub fn set_charge_slot_2(slot: TimeSlot) -> Vec<TransparentRequest> {
    set_slot(holding::CHARGE_SLOT_2_START, holding::CHARGE_SLOT_2_END, Some(slot))
}

pub fn reset_charge_slot_2() -> Vec<TransparentRequest> {
    set_slot(holding::CHARGE_SLOT_2_START, holding::CHARGE_SLOT_2_END, None)
}

pub fn set_discharge_slot_1(slot: TimeSlot) -> Vec<TransparentRequest> {
    set_slot(
        holding::DISCHARGE_SLOT_1_START,
        holding::DISCHARGE_SLOT_1_END,
        Some(slot),
    )
}

pub fn reset_discharge_slot_1() -> Vec<TransparentRequest> {
    set_slot(
        holding::DISCHARGE_SLOT_1_START,
        holding::DISCHARGE_SLOT_1_END,
        None,
    )
}

pub fn set_discharge_slot_2(slot: TimeSlot) -> Vec<TransparentRequest> {
    set_slot(
        holding::DISCHARGE_SLOT_2_START,
        holding::DISCHARGE_SLOT_2_END,
        Some(slot),
    )
}

pub fn reset_discharge_slot_2() -> Vec<TransparentRequest> {
    set_slot(
        holding::DISCHARGE_SLOT_2_START,
        holding::DISCHARGE_SLOT_2_END,
        None,
    )
}

/// 校准逆变器时钟；年份按 year-2000 存储
pub fn set_system_date_time(dt: NaiveDateTime) -> Result<Vec<TransparentRequest>> {
    let year = dt.year() - 2000;
    if !(0..=u16::MAX as i32).contains(&year) {
        return Err(Error::InvalidPduState {
            reason: format!("年份 {} 无法按 year-2000 编码", dt.year()),
            quirk: false,
        });
    }
    Ok(vec![
        write(holding::SYSTEM_TIME_YEAR, year as u16),
        write(holding::SYSTEM_TIME_MONTH, dt.month() as u16),
        write(holding::SYSTEM_TIME_DAY, dt.day() as u16),
        write(holding::SYSTEM_TIME_HOUR, dt.hour() as u16),
        write(holding::SYSTEM_TIME_MINUTE, dt.minute() as u16),
        write(holding::SYSTEM_TIME_SECOND, dt.second() as u16),
    ])
}

/// 动态 / 经济模式：尽量自发自用，少进少出
pub fn set_mode_dynamic() -> Result<Vec<TransparentRequest>> {
    Ok(vec![
        set_discharge_mode_demand(),
        set_shallow_charge(4)?,
        disable_discharge(),
    ])
}

/// 储能模式：白天存光伏，指定时段放电；export 为真时满功率出口
pub fn set_mode_storage(
    slot_1: TimeSlot,
    slot_2: Option<TimeSlot>,
    export: bool,
) -> Result<Vec<TransparentRequest>> {
    let mut requests = vec![if export {
        set_discharge_mode_max_power()
    } else {
        set_discharge_mode_demand()
    }];
    requests.push(set_shallow_charge(100)?);
    requests.push(enable_discharge());
    requests.extend(set_discharge_slot_1(slot_1));
    match slot_2 {
        Some(slot) => requests.extend(set_discharge_slot_2(slot)),
        None => requests.extend(reset_discharge_slot_2()),
    }
    Ok(requests)
}

/// 触发逆变器重启
pub fn reboot() -> TransparentRequest {
    write(holding::INVERTER_REBOOT, 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pdu::{TransparentRequestKind, SLAVE_INVERTER};

    fn as_write(req: &TransparentRequest) -> (u16, u16) {
        assert_eq!(req.slave_address, SLAVE_INVERTER);
        match req.kind {
            TransparentRequestKind::WriteHoldingRegister { register, value } => (register, value),
            ref other => panic!("应为写请求: {other:?}"),
        }
    }

    #[test]
    fn charge_target_sequence() {
        let reqs = set_charge_target(85).unwrap();
        assert_eq!(
            reqs.iter().map(as_write).collect::<Vec<_>>(),
            vec![(96, 1), (20, 1), (116, 85)]
        );
        // 100% 等价于解除目标限制
        let reqs = set_charge_target(100).unwrap();
        assert_eq!(
            reqs.iter().map(as_write).collect::<Vec<_>>(),
            vec![(96, 1), (20, 0), (116, 100)]
        );
    }

    #[test]
    fn range_checks_reject_before_any_bytes() {
        assert!(set_charge_target(3).is_err());
        assert!(set_charge_target(101).is_err());
        assert!(set_shallow_charge(2).is_err());
        assert!(set_battery_charge_limit(51).is_err());
        assert!(set_battery_discharge_limit(51).is_err());
        assert!(set_battery_power_reserve(101).is_err());
    }

    #[test]
    fn timeslot_writes_use_bcd_repr() {
        let slot = TimeSlot::from_repr(1600, 700).unwrap();
        let reqs = set_discharge_slot_1(slot);
        assert_eq!(
            reqs.iter().map(as_write).collect::<Vec<_>>(),
            vec![(56, 1600), (57, 700)]
        );
        let reqs = reset_discharge_slot_2();
        assert_eq!(
            reqs.iter().map(as_write).collect::<Vec<_>>(),
            vec![(44, 0), (45, 0)]
        );
    }

    #[test]
    fn system_clock_stores_year_offset() {
        let dt = chrono::NaiveDate::from_ymd_opt(2022, 1, 1)
            .unwrap()
            .and_hms_opt(23, 57, 19)
            .unwrap();
        let reqs = set_system_date_time(dt).unwrap();
        assert_eq!(
            reqs.iter().map(as_write).collect::<Vec<_>>(),
            vec![(35, 22), (36, 1), (37, 1), (38, 23), (39, 57), (40, 19)]
        );
    }

    #[test]
    fn storage_mode_sequence() {
        let slot = TimeSlot::from_repr(1600, 700).unwrap();
        let reqs = set_mode_storage(slot, None, false).unwrap();
        assert_eq!(
            reqs.iter().map(as_write).collect::<Vec<_>>(),
            vec![(27, 1), (110, 100), (59, 1), (56, 1600), (57, 700), (44, 0), (45, 0)]
        );
        let reqs = set_mode_storage(slot, None, true).unwrap();
        assert_eq!(as_write(&reqs[0]), (27, 0));
    }

    #[test]
    fn dynamic_mode_sequence() {
        let reqs = set_mode_dynamic().unwrap();
        assert_eq!(
            reqs.iter().map(as_write).collect::<Vec<_>>(),
            vec![(27, 1), (110, 4), (59, 0)]
        );
    }

    #[test]
    fn every_command_is_encodable() {
        // 所有命令产生的写请求都必须落在可写白名单内
        let slot = TimeSlot::from_repr(100, 400).unwrap();
        let mut all = vec![
            enable_charge(),
            disable_charge(),
            enable_discharge(),
            disable_discharge(),
            set_discharge_mode_max_power(),
            set_discharge_mode_demand(),
            reboot(),
        ];
        all.extend(set_charge_target(50).unwrap());
        all.extend(set_charge_slot_1(slot));
        all.extend(set_charge_slot_2(slot));
        all.extend(reset_charge_slot_1());
        all.extend(reset_charge_slot_2());
        all.extend(set_mode_storage(slot, Some(slot), true).unwrap());
        all.extend(set_mode_dynamic().unwrap());
        for req in all {
            assert!(req.ensure_valid_state().is_ok(), "{req:?}");
        }
    }
}
