// 逆变器结构化视图：从 0x32 缓存的 HR 与 IR 段投影。
// 每个字段独立计算；任一来源寄存器缺失则该字段为 None。
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::domain::register::Register::{Holding as HR, Input as IR};
use crate::domain::register_cache::RegisterCache;
use crate::domain::register_schema::{holding, input};
use crate::domain::timeslot::TimeSlot;

/// 已知机型；设备类型码最高 4 位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Model {
    Unknown,
    Hybrid,
    Ac,
    Hybrid3Ph,
    Ems,
    Ac3Ph,
    Gateway,
    AllInOne,
}

impl From<u16> for Model {
    fn from(nibble: u16) -> Self {
        match nibble {
            2 => Model::Hybrid,
            3 => Model::Ac,
            4 => Model::Hybrid3Ph,
            5 => Model::Ems,
            6 => Model::Ac3Ph,
            7 => Model::Gateway,
            8 => Model::AllInOne,
            _ => Model::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UsbDevice {
    Unknown,
    None,
    Wifi,
    Disk,
}

impl From<u16> for UsbDevice {
    fn from(raw: u16) -> Self {
        match raw {
            0 => UsbDevice::None,
            1 => UsbDevice::Wifi,
            2 => UsbDevice::Disk,
            _ => UsbDevice::Unknown,
        }
    }
}

/// 电池放电策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatteryPowerMode {
    Unknown,
    Export,
    SelfConsumption,
}

impl From<u16> for BatteryPowerMode {
    fn from(raw: u16) -> Self {
        match raw {
            0 => BatteryPowerMode::Export,
            1 => BatteryPowerMode::SelfConsumption,
            _ => BatteryPowerMode::Unknown,
        }
    }
}

/// 电池标定阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatteryCalibrationStage {
    Unknown,
    Off,
    Discharge,
    SetLowerLimit,
    Charge,
    SetUpperLimit,
    Balance,
    SetFullCapacity,
    Finish,
}

impl From<u16> for BatteryCalibrationStage {
    fn from(raw: u16) -> Self {
        match raw {
            0 => BatteryCalibrationStage::Off,
            1 => BatteryCalibrationStage::Discharge,
            2 => BatteryCalibrationStage::SetLowerLimit,
            3 => BatteryCalibrationStage::Charge,
            4 => BatteryCalibrationStage::SetUpperLimit,
            5 => BatteryCalibrationStage::Balance,
            6 => BatteryCalibrationStage::SetFullCapacity,
            7 => BatteryCalibrationStage::Finish,
            _ => BatteryCalibrationStage::Unknown,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Inverter {
    // 设备信息
    pub device_type_code: Option<String>,
    pub model: Option<Model>,
    pub module: Option<String>,
    pub serial_number: Option<String>,
    pub dsp_firmware_version: Option<u16>,
    pub arm_firmware_version: Option<u16>,
    pub firmware_version: Option<String>,
    pub modbus_address: Option<u8>,
    pub modbus_version: Option<f64>,

    // 安装配置
    pub num_mppt: Option<u8>,
    pub num_phases: Option<u8>,
    pub usb_device_inserted: Option<UsbDevice>,
    pub enable_ammeter: Option<bool>,
    pub select_arm_chip: Option<bool>,
    pub grid_port_max_power_output: Option<u16>,
    pub enable_60hz_freq_mode: Option<bool>,
    pub active_power_rate: Option<u16>,

    // 电池配置
    pub first_battery_serial_number: Option<String>,
    pub first_battery_bms_firmware_version: Option<u16>,
    pub battery_power_mode: Option<BatteryPowerMode>,
    pub battery_calibration_stage: Option<BatteryCalibrationStage>,
    pub enable_charge_target: Option<bool>,
    pub enable_charge: Option<bool>,
    pub enable_discharge: Option<bool>,
    pub battery_soc_reserve: Option<u16>,
    pub battery_charge_limit: Option<u16>,
    pub battery_discharge_limit: Option<u16>,
    pub battery_discharge_min_power_reserve: Option<u16>,
    pub charge_target_soc: Option<u16>,

    // 时刻表与系统时间
    pub charge_slot_1: Option<TimeSlot>,
    pub charge_slot_2: Option<TimeSlot>,
    pub discharge_slot_1: Option<TimeSlot>,
    pub discharge_slot_2: Option<TimeSlot>,
    pub system_time: Option<NaiveDateTime>,

    // 遥测
    pub inverter_status: Option<u16>,
    pub system_mode: Option<u16>,
    pub charge_status: Option<u16>,
    pub inverter_countdown: Option<u16>,
    pub fault_code: Option<u32>,
    pub v_pv1: Option<f64>,
    pub v_pv2: Option<f64>,
    pub v_p_bus: Option<f64>,
    pub v_n_bus: Option<f64>,
    pub v_ac1: Option<f64>,
    pub i_pv1: Option<f64>,
    pub i_pv2: Option<f64>,
    pub i_ac1: Option<f64>,
    pub i_grid_port: Option<f64>,
    pub f_ac1: Option<f64>,
    pub pf_inverter_out: Option<f64>,
    pub p_pv1: Option<u16>,
    pub p_pv2: Option<u16>,
    pub p_pv: Option<u32>,
    pub p_inverter_out: Option<i16>,
    pub p_grid_out: Option<i16>,
    pub p_grid_apparent: Option<u16>,
    pub p_eps_backup: Option<u16>,
    pub p_load_demand: Option<u16>,
    pub p_battery: Option<i16>,
    pub v_battery: Option<f64>,
    pub i_battery: Option<f64>,
    pub v_eps_backup: Option<f64>,
    pub f_eps_backup: Option<f64>,
    pub battery_percent: Option<u16>,
    pub temp_inverter_heatsink: Option<f64>,
    pub temp_charger: Option<f64>,
    pub temp_battery: Option<f64>,
    pub charger_warning_code: Option<u16>,
    pub work_time_total: Option<u32>,

    // 电量累计
    pub e_pv1_day: Option<f64>,
    pub e_pv2_day: Option<f64>,
    pub e_pv_day: Option<f64>,
    pub e_pv_total: Option<f64>,
    pub e_grid_out_day: Option<f64>,
    pub e_grid_in_day: Option<f64>,
    pub e_grid_out_total: Option<f64>,
    pub e_grid_in_total: Option<f64>,
    pub e_inverter_out_day: Option<f64>,
    pub e_inverter_in_day: Option<f64>,
    pub e_inverter_out_total: Option<f64>,
    pub e_inverter_in_total: Option<f64>,
    pub e_battery_charge_day: Option<f64>,
    pub e_battery_discharge_day: Option<f64>,
    pub e_battery_charge_day_2: Option<f64>,
    pub e_battery_discharge_day_2: Option<f64>,
    pub e_battery_charge_total: Option<f64>,
    pub e_battery_discharge_total: Option<f64>,
    pub e_battery_throughput_total: Option<f64>,
    pub e_discharge_year: Option<f64>,
    pub e_solar_diverter: Option<f64>,
}

impl Inverter {
    pub fn from_registers(c: &RegisterCache) -> Inverter {
        let serial_regs = |start: u16| [HR(start), HR(start + 1), HR(start + 2), HR(start + 3), HR(start + 4)];
        let mppt_phases = c.to_duint8(HR(holding::NUM_MPPT_AND_NUM_PHASES));
        let dsp = c.get(HR(holding::DSP_FIRMWARE_VERSION));
        let arm = c.get(HR(holding::ARM_FIRMWARE_VERSION));

        Inverter {
            device_type_code: c.to_hex_string(&[HR(holding::DEVICE_TYPE_CODE)]),
            model: c
                .get(HR(holding::DEVICE_TYPE_CODE))
                .map(|raw| Model::from(raw >> 12)),
            module: c.to_hex_string(&[HR(holding::INVERTER_MODULE_H), HR(holding::INVERTER_MODULE_L)]),
            serial_number: c.to_string_value(&serial_regs(holding::SERIAL_NUMBER_START)),
            dsp_firmware_version: dsp,
            arm_firmware_version: arm,
            firmware_version: match (dsp, arm) {
                (Some(dsp), Some(arm)) => Some(format!("D0.{dsp}-A0.{arm}")),
                _ => None,
            },
            modbus_address: c
                .get(HR(holding::INVERTER_MODBUS_ADDRESS))
                .map(|raw| (raw & 0xff) as u8),
            modbus_version: c.to_f64(HR(holding::MODBUS_VERSION)),

            num_mppt: mppt_phases.map(|(mppt, _)| mppt),
            num_phases: mppt_phases.map(|(_, phases)| phases),
            usb_device_inserted: c.get(HR(holding::USB_DEVICE_INSERTED)).map(UsbDevice::from),
            enable_ammeter: c.to_bool(HR(holding::ENABLE_AMMETER)),
            select_arm_chip: c.to_bool(HR(holding::SELECT_ARM_CHIP)),
            grid_port_max_power_output: c.get(HR(holding::GRID_PORT_MAX_POWER_OUTPUT)),
            enable_60hz_freq_mode: c.to_bool(HR(holding::ENABLE_60HZ_FREQ_MODE)),
            active_power_rate: c.get(HR(holding::ACTIVE_POWER_RATE)),

            first_battery_serial_number: c
                .to_string_value(&serial_regs(holding::FIRST_BATTERY_SERIAL_NUMBER_START)),
            first_battery_bms_firmware_version: c.get(HR(holding::FIRST_BATTERY_BMS_FIRMWARE_VERSION)),
            battery_power_mode: c.get(HR(holding::BATTERY_POWER_MODE)).map(BatteryPowerMode::from),
            battery_calibration_stage: c
                .get(HR(holding::SOC_FORCE_ADJUST))
                .map(BatteryCalibrationStage::from),
            enable_charge_target: c.to_bool(HR(holding::ENABLE_CHARGE_TARGET)),
            enable_charge: c.to_bool(HR(holding::ENABLE_CHARGE)),
            enable_discharge: c.to_bool(HR(holding::ENABLE_DISCHARGE)),
            battery_soc_reserve: c.get(HR(holding::BATTERY_SOC_RESERVE)),
            battery_charge_limit: c.get(HR(holding::BATTERY_CHARGE_LIMIT)),
            battery_discharge_limit: c.get(HR(holding::BATTERY_DISCHARGE_LIMIT)),
            battery_discharge_min_power_reserve: c
                .get(HR(holding::BATTERY_DISCHARGE_MIN_POWER_RESERVE)),
            charge_target_soc: c.get(HR(holding::CHARGE_TARGET_SOC)),

            charge_slot_1: c.to_timeslot(HR(holding::CHARGE_SLOT_1_START), HR(holding::CHARGE_SLOT_1_END)),
            charge_slot_2: c.to_timeslot(HR(holding::CHARGE_SLOT_2_START), HR(holding::CHARGE_SLOT_2_END)),
            discharge_slot_1: c.to_timeslot(
                HR(holding::DISCHARGE_SLOT_1_START),
                HR(holding::DISCHARGE_SLOT_1_END),
            ),
            discharge_slot_2: c.to_timeslot(
                HR(holding::DISCHARGE_SLOT_2_START),
                HR(holding::DISCHARGE_SLOT_2_END),
            ),
            system_time: system_time(c),

            inverter_status: c.get(IR(input::INVERTER_STATUS)),
            system_mode: c.get(IR(input::SYSTEM_MODE)),
            charge_status: c.get(IR(input::CHARGE_STATUS)),
            inverter_countdown: c.get(IR(input::INVERTER_COUNTDOWN)),
            fault_code: c.to_uint32(IR(input::FAULT_CODE_H), IR(input::FAULT_CODE_L)),
            v_pv1: c.to_f64(IR(input::V_PV1)),
            v_pv2: c.to_f64(IR(input::V_PV2)),
            v_p_bus: c.to_f64(IR(input::V_P_BUS)),
            v_n_bus: c.to_f64(IR(input::V_N_BUS)),
            v_ac1: c.to_f64(IR(input::V_AC1)),
            i_pv1: c.to_f64(IR(input::I_PV1)),
            i_pv2: c.to_f64(IR(input::I_PV2)),
            i_ac1: c.to_f64(IR(input::I_AC1)),
            i_grid_port: c.to_f64(IR(input::I_GRID_PORT)),
            f_ac1: c.to_f64(IR(input::F_AC1)),
            pf_inverter_out: c.to_f64(IR(input::PF_INVERTER_OUT)),
            p_pv1: c.get(IR(input::P_PV1)),
            p_pv2: c.get(IR(input::P_PV2)),
            p_pv: match (c.get(IR(input::P_PV1)), c.get(IR(input::P_PV2))) {
                (Some(a), Some(b)) => Some(a as u32 + b as u32),
                _ => None,
            },
            p_inverter_out: c.to_i16(IR(input::P_INVERTER_OUT)),
            p_grid_out: c.to_i16(IR(input::P_GRID_OUT)),
            p_grid_apparent: c.get(IR(input::P_GRID_APPARENT)),
            p_eps_backup: c.get(IR(input::P_EPS_BACKUP)),
            p_load_demand: c.get(IR(input::P_LOAD_DEMAND)),
            p_battery: c.to_i16(IR(input::P_BATTERY)),
            v_battery: c.to_f64(IR(input::V_BATTERY)),
            i_battery: c.to_f64(IR(input::I_BATTERY)),
            v_eps_backup: c.to_f64(IR(input::V_EPS_BACKUP)),
            f_eps_backup: c.to_f64(IR(input::F_EPS_BACKUP)),
            battery_percent: c.get(IR(input::BATTERY_PERCENT)),
            temp_inverter_heatsink: c.to_f64(IR(input::TEMP_INVERTER_HEATSINK)),
            temp_charger: c.to_f64(IR(input::TEMP_CHARGER)),
            temp_battery: c.to_f64(IR(input::TEMP_BATTERY)),
            charger_warning_code: c.get(IR(input::CHARGER_WARNING_CODE)),
            work_time_total: c.to_uint32(IR(input::WORK_TIME_TOTAL_H), IR(input::WORK_TIME_TOTAL_L)),

            e_pv1_day: c.to_f64(IR(input::E_PV1_DAY)),
            e_pv2_day: c.to_f64(IR(input::E_PV2_DAY)),
            e_pv_day: match (c.to_f64(IR(input::E_PV1_DAY)), c.to_f64(IR(input::E_PV2_DAY))) {
                (Some(a), Some(b)) => Some(a + b),
                _ => None,
            },
            e_pv_total: c.to_scaled_uint32(IR(input::E_PV_TOTAL_H), IR(input::E_PV_TOTAL_L)),
            e_grid_out_day: c.to_f64(IR(input::E_GRID_OUT_DAY)),
            e_grid_in_day: c.to_f64(IR(input::E_GRID_IN_DAY)),
            e_grid_out_total: c
                .to_scaled_uint32(IR(input::E_GRID_OUT_TOTAL_H), IR(input::E_GRID_OUT_TOTAL_L)),
            e_grid_in_total: c
                .to_scaled_uint32(IR(input::E_GRID_IN_TOTAL_H), IR(input::E_GRID_IN_TOTAL_L)),
            e_inverter_out_day: c.to_f64(IR(input::E_INVERTER_OUT_DAY)),
            e_inverter_in_day: c.to_f64(IR(input::E_INVERTER_IN_DAY)),
            e_inverter_out_total: c.to_scaled_uint32(
                IR(input::E_INVERTER_OUT_TOTAL_H),
                IR(input::E_INVERTER_OUT_TOTAL_L),
            ),
            e_inverter_in_total: c.to_scaled_uint32(
                IR(input::E_INVERTER_IN_TOTAL_H),
                IR(input::E_INVERTER_IN_TOTAL_L),
            ),
            e_battery_charge_day: c.to_f64(IR(input::E_BATTERY_CHARGE_DAY)),
            e_battery_discharge_day: c.to_f64(IR(input::E_BATTERY_DISCHARGE_DAY)),
            e_battery_charge_day_2: c.to_f64(IR(input::E_BATTERY_CHARGE_DAY_2)),
            e_battery_discharge_day_2: c.to_f64(IR(input::E_BATTERY_DISCHARGE_DAY_2)),
            e_battery_charge_total: c.to_f64(IR(input::E_BATTERY_CHARGE_TOTAL)),
            e_battery_discharge_total: c.to_f64(IR(input::E_BATTERY_DISCHARGE_TOTAL)),
            e_battery_throughput_total: c.to_scaled_uint32(
                IR(input::E_BATTERY_THROUGHPUT_TOTAL_H),
                IR(input::E_BATTERY_THROUGHPUT_TOTAL_L),
            ),
            e_discharge_year: c.to_f64(IR(input::E_DISCHARGE_YEAR)),
            e_solar_diverter: c.to_f64(IR(input::E_SOLAR_DIVERTER)),
        }
    }
}

/// 六个独立寄存器组合系统时间，年份存储为 year-2000
fn system_time(c: &RegisterCache) -> Option<NaiveDateTime> {
    let year = c.get(HR(holding::SYSTEM_TIME_YEAR))?;
    let month = c.get(HR(holding::SYSTEM_TIME_MONTH))?;
    let day = c.get(HR(holding::SYSTEM_TIME_DAY))?;
    let hour = c.get(HR(holding::SYSTEM_TIME_HOUR))?;
    let minute = c.get(HR(holding::SYSTEM_TIME_MINUTE))?;
    let second = c.get(HR(holding::SYSTEM_TIME_SECOND))?;
    NaiveDate::from_ymd_opt(2000 + year as i32, month as u32, day as u32)?
        .and_hms_opt(hour as u32, minute as u32, second as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::register::Register;

    /// 组一个只有 HR[0..60) 的缓存（对应一帧保持寄存器响应）
    fn holding_block() -> RegisterCache {
        let values: [u16; 60] = [
            0x2001, 0x0003, 0x0832, 0x0201, 0x0000, 0xC350, 0x0E10, 0x0001, 0x4247, 0x3132,
            0x3334, 0x4735, 0x3637, 0x5341, 0x3132, 0x3334, 0x4735, 0x3637, 0x0BBD, 0x01C1,
            0x0000, 0x01C1, 0x0002, 0x0000, 0x8000, 0x761B, 0x1770, 0x0001, 0x0000, 0x0000,
            0x0011, 0x0000, 0x0004, 0x0007, 0x008C, 0x0016, 0x0004, 0x0011, 0x0013, 0x0001,
            0x0001, 0x0001, 0x0002, 0x0000, 0x0000, 0x0000, 0x0065, 0x0001, 0x0000, 0x0000,
            0x0064, 0x0000, 0x0000, 0x0001, 0x0001, 0x00A0, 0x0640, 0x02BC, 0x0001, 0x0000,
        ];
        let entries: Vec<(Register, u16)> = values
            .iter()
            .enumerate()
            .map(|(i, v)| (Register::Holding(i as u16), *v))
            .collect();
        let mut cache = RegisterCache::new();
        cache.bulk_update(&entries).unwrap();
        cache
    }

    #[test]
    fn view_from_holding_block() {
        let inverter = Inverter::from_registers(&holding_block());
        assert_eq!(inverter.serial_number.as_deref(), Some("SA1234G567"));
        assert_eq!(
            inverter.first_battery_serial_number.as_deref(),
            Some("BG1234G567")
        );
        assert_eq!(inverter.firmware_version.as_deref(), Some("D0.449-A0.449"));
        assert_eq!(inverter.num_mppt, Some(2));
        assert_eq!(inverter.num_phases, Some(1));
        assert_eq!(inverter.model, Some(Model::Hybrid));
        assert_eq!(inverter.device_type_code.as_deref(), Some("2001"));
        assert_eq!(inverter.module.as_deref(), Some("00030832"));
        assert_eq!(inverter.modbus_address, Some(0x11));
        assert_eq!(inverter.usb_device_inserted, Some(UsbDevice::Disk));
        assert_eq!(
            inverter.battery_power_mode,
            Some(BatteryPowerMode::SelfConsumption)
        );
        assert_eq!(inverter.enable_charge_target, Some(false));
        assert_eq!(
            inverter.system_time,
            NaiveDate::from_ymd_opt(2022, 4, 17).and_then(|d| d.and_hms_opt(19, 1, 1))
        );
        // 充电时段 2 为 00:00-00:04
        let slot = inverter.charge_slot_2.unwrap();
        assert_eq!((slot.start_repr(), slot.end_repr()), (0, 4));
        // IR 段没有数据 -> 遥测字段缺席
        assert_eq!(inverter.v_pv1, None);
        assert_eq!(inverter.p_pv, None);
        assert_eq!(inverter.e_pv_day, None);
    }

    #[test]
    fn aggregates_need_both_sources() {
        let mut cache = holding_block();
        cache
            .bulk_update(&[
                (Register::Input(17), 4),
                (Register::Input(18), 117),
                (Register::Input(19), 6),
                (Register::Input(20), 128),
            ])
            .unwrap();
        let inverter = Inverter::from_registers(&cache);
        assert_eq!(inverter.p_pv, Some(245));
        assert_eq!(inverter.e_pv_day, Some(1.0));
    }
}
