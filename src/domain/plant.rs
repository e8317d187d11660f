// 电站模型：按从机地址组织的寄存器缓存集合，由响应 PDU 驱动更新
use std::collections::HashMap;

use log::{debug, warn};

use crate::domain::battery::Battery;
use crate::domain::inverter::Inverter;
use crate::domain::register_cache::RegisterCache;
use crate::error::Result;
use crate::services::pdu::{TransparentResponse, SLAVE_DATA};

#[derive(Debug, Clone, Default)]
pub struct Plant {
    register_caches: HashMap<u8, RegisterCache>,
    /// 实际接入的电池数量；由外部配置而非自动发现
    pub number_batteries: usize,
}

impl Plant {
    pub fn new(number_batteries: usize) -> Self {
        let mut register_caches = HashMap::new();
        register_caches.insert(SLAVE_DATA, RegisterCache::new());
        for i in 1..number_batteries {
            register_caches.insert(SLAVE_DATA + i as u8, RegisterCache::new());
        }
        Self {
            register_caches,
            number_batteries,
        }
    }

    /// 依据一个响应 PDU 更新对应从机的缓存。
    /// 整批校验失败时该响应被拒绝、缓存保持原样，错误上抛给调用方处置。
    pub fn update(&mut self, pdu: &TransparentResponse) -> Result<()> {
        if pdu.error {
            debug!("错误响应不参与缓存更新: 从机 0x{:02x}", pdu.slave_address);
            return Ok(());
        }
        let entries = pdu.register_entries();
        if entries.is_empty() {
            return Ok(());
        }
        let cache = self
            .register_caches
            .entry(pdu.slave_address)
            .or_insert_with(|| {
                warn!("出现未预期的从机地址 0x{:02x}，为其新建缓存", pdu.slave_address);
                RegisterCache::new()
            });
        cache.bulk_update(&entries)
    }

    pub fn register_cache(&self, slave_address: u8) -> Option<&RegisterCache> {
        self.register_caches.get(&slave_address)
    }

    /// 逆变器视图，投影自 0x32 缓存
    pub fn inverter(&self) -> Option<Inverter> {
        self.register_caches.get(&SLAVE_DATA).map(Inverter::from_registers)
    }

    /// 各电池视图；过滤掉序列号无效（未真实在位）的从机
    pub fn batteries(&self) -> Vec<Battery> {
        (0..self.number_batteries)
            .filter_map(|i| self.register_caches.get(&(SLAVE_DATA + i as u8)))
            .map(Battery::from_registers)
            .filter(Battery::is_valid)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::register::Register;
    use crate::services::pdu::{TransparentRequest, TransparentResponseKind};

    fn read_response(slave: u8, holding: bool, base: u16, values: Vec<u16>) -> TransparentResponse {
        let count = values.len() as u16;
        let mut template = if holding {
            TransparentRequest::read_holding_registers(base, count, slave).expected_response()
        } else {
            TransparentRequest::read_input_registers(base, count, slave).expected_response()
        };
        template.kind = if holding {
            TransparentResponseKind::ReadHoldingRegisters {
                base_register: base,
                register_count: count,
                register_values: values,
            }
        } else {
            TransparentResponseKind::ReadInputRegisters {
                base_register: base,
                register_count: count,
                register_values: values,
            }
        };
        template
    }

    #[test]
    fn read_response_merges_into_cache() {
        let mut plant = Plant::new(1);
        let resp = read_response(SLAVE_DATA, true, 13, vec![0x5341, 0x3132, 0x3334, 0x4735, 0x3637]);
        plant.update(&resp).unwrap();
        let inverter = plant.inverter().unwrap();
        assert_eq!(inverter.serial_number.as_deref(), Some("SA1234G567"));
    }

    #[test]
    fn rejected_batch_leaves_cache_untouched() {
        let mut plant = Plant::new(1);
        plant
            .update(&read_response(SLAVE_DATA, false, 0, vec![1, 2363]))
            .unwrap();
        // IR:1 电压刻度下 0xFFFF 不合理 -> 整帧拒绝
        let err = plant.update(&read_response(SLAVE_DATA, false, 0, vec![2, 0xFFFF]));
        assert!(err.is_err());
        let cache = plant.register_cache(SLAVE_DATA).unwrap();
        assert_eq!(cache.get(Register::Input(0)), Some(1));
        assert_eq!(cache.get(Register::Input(1)), Some(2363));
    }

    #[test]
    fn unknown_slave_creates_cache() {
        let mut plant = Plant::new(1);
        assert!(plant.register_cache(0x35).is_none());
        plant
            .update(&read_response(0x35, false, 0, vec![1]))
            .unwrap();
        assert!(plant.register_cache(0x35).is_some());
    }

    #[test]
    fn write_response_applies_single_register() {
        let mut plant = Plant::new(1);
        let mut resp = TransparentRequest::write_holding_register(116, 85).expected_response();
        resp.slave_address = SLAVE_DATA;
        plant.update(&resp).unwrap();
        assert_eq!(
            plant
                .register_cache(SLAVE_DATA)
                .unwrap()
                .get(Register::Holding(116)),
            Some(85)
        );
    }

    #[test]
    fn error_response_is_ignored() {
        let mut plant = Plant::new(1);
        let mut resp = read_response(SLAVE_DATA, false, 0, vec![]);
        resp.error = true;
        plant.update(&resp).unwrap();
        assert!(plant.register_cache(SLAVE_DATA).unwrap().is_empty());
    }

    #[test]
    fn batteries_filter_invalid_serials() {
        let mut plant = Plant::new(2);
        // 第一块电池带真实序列号
        let mut values = vec![0u16; 60];
        values[50] = 0x4247;
        values[51] = 0x3132;
        values[52] = 0x3334;
        values[53] = 0x4735;
        values[54] = 0x3637;
        plant
            .update(&read_response(SLAVE_DATA, false, 60, values))
            .unwrap();
        // 第二块电池从未上报 -> 缓存为空，序列号缺失
        let batteries = plant.batteries();
        assert_eq!(batteries.len(), 1);
        assert_eq!(
            batteries[0].battery_serial_number.as_deref(),
            Some("BG1234G567")
        );
    }
}
