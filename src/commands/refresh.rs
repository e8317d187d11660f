// 刷新请求集：一个刷新节拍要下发的读请求序列
use crate::services::pdu::{TransparentRequest, SLAVE_DATA};

/// 常规节拍只读输入段；整刷节拍追加保持段与中段输入，用于捕获配置变化。
/// 每块已配置的电池各读一帧 BMS 段。
pub fn refresh_plant_data(full_refresh: bool, number_batteries: usize) -> Vec<TransparentRequest> {
    let mut requests = vec![
        TransparentRequest::read_input_registers(0, 60, SLAVE_DATA),
        TransparentRequest::read_input_registers(180, 60, SLAVE_DATA),
    ];
    if full_refresh {
        requests.push(TransparentRequest::read_holding_registers(0, 60, SLAVE_DATA));
        requests.push(TransparentRequest::read_holding_registers(60, 60, SLAVE_DATA));
        requests.push(TransparentRequest::read_holding_registers(120, 60, SLAVE_DATA));
        requests.push(TransparentRequest::read_input_registers(120, 60, SLAVE_DATA));
    }
    for i in 0..number_batteries {
        requests.push(TransparentRequest::read_input_registers(
            60,
            60,
            SLAVE_DATA + i as u8,
        ));
    }
    requests
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pdu::TransparentRequestKind;

    fn spec(req: &TransparentRequest) -> (u8, u8, u16, u16) {
        match req.kind {
            TransparentRequestKind::ReadHoldingRegisters {
                base_register,
                register_count,
            } => (req.slave_address, 3, base_register, register_count),
            TransparentRequestKind::ReadInputRegisters {
                base_register,
                register_count,
            } => (req.slave_address, 4, base_register, register_count),
            _ => panic!("刷新集不应包含写请求"),
        }
    }

    #[test]
    fn plain_refresh_reads_input_banks() {
        let reqs = refresh_plant_data(false, 0);
        assert_eq!(
            reqs.iter().map(spec).collect::<Vec<_>>(),
            vec![(0x32, 4, 0, 60), (0x32, 4, 180, 60)]
        );
    }

    #[test]
    fn full_refresh_adds_holding_banks_and_batteries() {
        let reqs = refresh_plant_data(true, 2);
        assert_eq!(
            reqs.iter().map(spec).collect::<Vec<_>>(),
            vec![
                (0x32, 4, 0, 60),
                (0x32, 4, 180, 60),
                (0x32, 3, 0, 60),
                (0x32, 3, 60, 60),
                (0x32, 3, 120, 60),
                (0x32, 4, 120, 60),
                (0x32, 4, 60, 60),
                (0x33, 4, 60, 60),
            ]
        );
    }

    #[test]
    fn every_refresh_request_is_encodable() {
        for req in refresh_plant_data(true, 5) {
            assert!(req.ensure_valid_state().is_ok());
        }
    }
}
