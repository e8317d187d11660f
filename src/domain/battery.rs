// 电池（BMS）结构化视图：从电池从机缓存的 IR[60..120) 段投影
use serde::Serialize;

use crate::domain::register::Register::Input as IR;
use crate::domain::register_cache::RegisterCache;
use crate::domain::register_schema::input;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Battery {
    pub battery_serial_number: Option<String>,
    pub v_cell: [Option<f64>; 16],
    pub temp_cells_1: Option<f64>,
    pub temp_cells_2: Option<f64>,
    pub temp_cells_3: Option<f64>,
    pub temp_cells_4: Option<f64>,
    pub v_cells_sum: Option<f64>,
    pub temp_bms_mos: Option<f64>,
    pub v_battery_out: Option<f64>,
    pub full_capacity: Option<f64>,
    pub design_capacity: Option<f64>,
    pub remaining_capacity: Option<f64>,
    pub design_capacity_2: Option<f64>,
    pub status_1_2: Option<(u8, u8)>,
    pub status_3_4: Option<(u8, u8)>,
    pub status_5_6: Option<(u8, u8)>,
    pub status_7: Option<(u8, u8)>,
    pub warning_1_2: Option<(u8, u8)>,
    pub num_cycles: Option<u16>,
    pub num_cells: Option<u16>,
    pub bms_firmware_version: Option<u16>,
    pub soc: Option<u16>,
    pub temp_max: Option<f64>,
    pub temp_min: Option<f64>,
    pub e_charge_total: Option<f64>,
    pub e_discharge_total: Option<f64>,
    pub usb_inserted: Option<u16>,
}

impl Battery {
    pub fn from_registers(c: &RegisterCache) -> Battery {
        let mut v_cell = [None; 16];
        for (i, slot) in v_cell.iter_mut().enumerate() {
            *slot = c.to_f64(IR(input::V_CELL_START + i as u16));
        }
        Battery {
            battery_serial_number: c.to_string_value(&[
                IR(input::BATTERY_SERIAL_NUMBER_START),
                IR(input::BATTERY_SERIAL_NUMBER_START + 1),
                IR(input::BATTERY_SERIAL_NUMBER_START + 2),
                IR(input::BATTERY_SERIAL_NUMBER_START + 3),
                IR(input::BATTERY_SERIAL_NUMBER_START + 4),
            ]),
            v_cell,
            temp_cells_1: c.to_f64(IR(input::TEMP_CELLS_START)),
            temp_cells_2: c.to_f64(IR(input::TEMP_CELLS_START + 1)),
            temp_cells_3: c.to_f64(IR(input::TEMP_CELLS_START + 2)),
            temp_cells_4: c.to_f64(IR(input::TEMP_CELLS_START + 3)),
            v_cells_sum: c.to_f64(IR(input::V_CELLS_SUM)),
            temp_bms_mos: c.to_f64(IR(input::TEMP_BMS_MOS)),
            v_battery_out: c.to_scaled_uint32(IR(input::V_BATTERY_OUT_H), IR(input::V_BATTERY_OUT_L)),
            full_capacity: c.to_scaled_uint32(IR(input::FULL_CAPACITY_H), IR(input::FULL_CAPACITY_L)),
            design_capacity: c
                .to_scaled_uint32(IR(input::DESIGN_CAPACITY_H), IR(input::DESIGN_CAPACITY_L)),
            remaining_capacity: c.to_scaled_uint32(
                IR(input::REMAINING_CAPACITY_H),
                IR(input::REMAINING_CAPACITY_L),
            ),
            design_capacity_2: c
                .to_scaled_uint32(IR(input::DESIGN_CAPACITY_2_H), IR(input::DESIGN_CAPACITY_2_L)),
            status_1_2: c.to_duint8(IR(input::STATUS_1_2)),
            status_3_4: c.to_duint8(IR(input::STATUS_3_4)),
            status_5_6: c.to_duint8(IR(input::STATUS_5_6)),
            status_7: c.to_duint8(IR(input::STATUS_7)),
            warning_1_2: c.to_duint8(IR(input::WARNING_1_2)),
            num_cycles: c.get(IR(input::NUM_CYCLES)),
            num_cells: c.get(IR(input::NUM_CELLS)),
            bms_firmware_version: c.get(IR(input::BMS_FIRMWARE_VERSION)),
            soc: c.get(IR(input::SOC)),
            temp_max: c.to_f64(IR(input::TEMP_MAX)),
            temp_min: c.to_f64(IR(input::TEMP_MIN)),
            e_charge_total: c.to_f64(IR(input::E_CHARGE_TOTAL)),
            e_discharge_total: c.to_f64(IR(input::E_DISCHARGE_TOTAL)),
            usb_inserted: c.get(IR(input::USB_INSERTED)),
        }
    }

    /// 序列号存在、非空且不全为 NUL 才视为真实在位的电池
    pub fn is_valid(&self) -> bool {
        match &self.battery_serial_number {
            Some(serial) => !serial.is_empty() && serial.chars().any(|c| c != '\0'),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::register::Register;

    /// 白天放电中的一块电池的 IR[60..120) 快照
    fn battery_block() -> RegisterCache {
        let values: [u16; 60] = [
            3232, 3237, 3235, 3232, 3235, 3229, 3237, 3233, 3238, 3237, 3235, 3235, 3235, 3235,
            3240, 3238, 168, 157, 165, 146, 51832, 172, 0, 51816, 0, 19513, 0, 16000, 0, 13142,
            0, 3600, 256, 0, 0, 0, 23, 16, 3005, 0, 67, 0, 16000, 168, 157, 1696, 1744, 0, 0, 0,
            16967, 12594, 13108, 18229, 13879, 8, 0, 0, 0, 0,
        ];
        let entries: Vec<(Register, u16)> = values
            .iter()
            .enumerate()
            .map(|(i, v)| (Register::Input(60 + i as u16), *v))
            .collect();
        let mut cache = RegisterCache::new();
        cache.bulk_update(&entries).unwrap();
        cache
    }

    #[test]
    fn view_from_bms_block() {
        let battery = Battery::from_registers(&battery_block());
        assert_eq!(battery.battery_serial_number.as_deref(), Some("BG1234G567"));
        assert!(battery.is_valid());
        assert_eq!(battery.v_cell[0], Some(3.232));
        assert_eq!(battery.v_cell[15], Some(3.238));
        assert_eq!(battery.v_cells_sum, Some(51.832));
        assert_eq!(battery.v_battery_out, Some(51.816));
        assert_eq!(battery.full_capacity, Some(195.13));
        assert_eq!(battery.design_capacity, Some(160.0));
        assert_eq!(battery.remaining_capacity, Some(131.42));
        assert_eq!(battery.design_capacity_2, Some(160.0));
        assert_eq!(battery.status_3_4, Some((14, 16)));
        assert_eq!(battery.status_5_6, Some((1, 0)));
        assert_eq!(battery.warning_1_2, Some((0, 0)));
        assert_eq!(battery.num_cycles, Some(23));
        assert_eq!(battery.num_cells, Some(16));
        assert_eq!(battery.bms_firmware_version, Some(3005));
        assert_eq!(battery.soc, Some(67));
        assert_eq!(battery.temp_bms_mos, Some(17.2));
        assert_eq!(battery.temp_max, Some(16.8));
        assert_eq!(battery.temp_min, Some(15.7));
        assert_eq!(battery.e_charge_total, Some(174.4));
        assert_eq!(battery.e_discharge_total, Some(169.6));
        assert_eq!(battery.usb_inserted, Some(8));
    }

    #[test]
    fn all_nul_serial_is_invalid() {
        let entries: Vec<(Register, u16)> = (60..120).map(|i| (Register::Input(i), 0)).collect();
        let mut cache = RegisterCache::new();
        cache.bulk_update(&entries).unwrap();
        let battery = Battery::from_registers(&cache);
        assert_eq!(battery.battery_serial_number.as_deref(), Some(""));
        assert!(!battery.is_valid());
    }

    #[test]
    fn missing_registers_leave_fields_absent() {
        let battery = Battery::from_registers(&RegisterCache::new());
        assert_eq!(battery.battery_serial_number, None);
        assert!(!battery.is_valid());
        assert_eq!(battery.soc, None);
    }
}
