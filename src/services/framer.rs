// 字节流成帧器：从任意切分的输入中识别厂商 MBAP 信封，
// 头部损坏时扫描 59 59 00 01 签名重新同步；除重同步所需外不静默丢字节。
use log::{debug, info};

use crate::error::{Error, Result};
use crate::services::codec::PayloadEncoder;
use crate::services::pdu::{Pdu, MAIN_HEARTBEAT, MAIN_TRANSPARENT};

/// MBAP 头 + fid，共 8 字节
const FRAME_HEAD_SIZE: usize = 8;
/// 头部前 4 字节恒为 59 59 00 01，可作扫描签名
const FRAME_SIGNATURE: [u8; 4] = [0x59, 0x59, 0x00, 0x01];

#[derive(Debug, Default)]
pub struct Framer {
    buffer: Vec<u8>,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 缓冲中尚未消费的字节数
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// 吞入一段字节并尽量多地取出完整帧。
    /// 每个完整帧连同解码结果（或解码错误）原样交给调用方处置。
    pub fn process_incoming_data(&mut self, data: &[u8]) -> Vec<(Result<Pdu>, Vec<u8>)> {
        self.buffer.extend_from_slice(data);
        let mut out = Vec::new();
        loop {
            if self.buffer.len() < FRAME_HEAD_SIZE {
                break;
            }
            if !self.header_plausible() {
                if !self.resync() {
                    break; // 签名未现，等更多数据
                }
                continue;
            }
            let length = u16::from_be_bytes([self.buffer[4], self.buffer[5]]) as usize;
            // length 含 uid 与 fid，因此完整帧长 = 6 + length
            let frame_len = FRAME_HEAD_SIZE + length - 2;
            if self.buffer.len() < frame_len {
                debug!("帧未完整：需 {frame_len} 字节，已有 {}", self.buffer.len());
                break;
            }
            let frame: Vec<u8> = self.buffer.drain(..frame_len).collect();
            out.push((Pdu::decode_incoming(&frame), frame));
        }
        out
    }

    /// 头部各静态字段是否符合厂商方言
    fn header_plausible(&self) -> bool {
        self.buffer[..4] == FRAME_SIGNATURE
            && self.buffer[6] == 0x01
            && (self.buffer[7] == MAIN_HEARTBEAT || self.buffer[7] == MAIN_TRANSPARENT)
            && u16::from_be_bytes([self.buffer[4], self.buffer[5]]) >= 2
    }

    /// 从偏移 1 起找下一处签名；找到则丢弃其前的垃圾字节
    fn resync(&mut self) -> bool {
        let offset = self.buffer[1..]
            .windows(FRAME_SIGNATURE.len())
            .position(|w| w == FRAME_SIGNATURE)
            .map(|p| p + 1);
        match offset {
            Some(offset) => {
                info!("在偏移 {offset} 处找到下一帧签名，丢弃之前的 {offset} 字节");
                self.buffer.drain(..offset);
                true
            }
            None => {
                debug!("未找到后续帧签名，保留缓冲等待更多数据");
                false
            }
        }
    }

    /// 由 PDU 构造完整出站帧：恒定头 + 帧体；length 按厂商口径为帧体长 + 2
    pub fn build_packet(pdu: &Pdu) -> Result<Vec<u8>> {
        let body = pdu.encode()?;
        if body.len() + 2 > u16::MAX as usize {
            return Err(Error::InvalidFrame {
                reason: format!("帧体过长: {} 字节", body.len()),
            });
        }
        let mut e = PayloadEncoder::new();
        e.add_u16(0x5959);
        e.add_u16(0x0001);
        e.add_u16((body.len() + 2) as u16);
        e.add_u8(0x01);
        e.add_u8(pdu.main_function_code());
        let mut packet = e.into_bytes();
        packet.extend_from_slice(&body);
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pdu::{HeartbeatRequest, TransparentRequest, SLAVE_DATA};

    fn heartbeat_frame() -> Vec<u8> {
        let hb = HeartbeatRequest {
            data_adapter_serial_number: "WF1234G567".to_string(),
            data_adapter_type: 1,
        };
        // 心跳请求帧与其镜像响应编码一致，直接借响应编码构造
        Framer::build_packet(&Pdu::HeartbeatResponse(hb.expected_response())).unwrap()
    }

    fn request_frame(base: u16) -> Vec<u8> {
        let req = TransparentRequest::read_input_registers(base, 60, SLAVE_DATA);
        Framer::build_packet(&Pdu::TransparentRequest(req)).unwrap()
    }

    #[test]
    fn whole_frame_in_one_chunk() {
        let mut framer = Framer::new();
        let results = framer.process_incoming_data(&heartbeat_frame());
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].0, Ok(Pdu::HeartbeatRequest(_))));
        assert_eq!(framer.buffered_bytes(), 0);
    }

    #[test]
    fn fragmented_frames_reassemble_in_order() {
        // 三个帧黏在一起，按奇怪的步长切开喂入
        let stream = [heartbeat_frame(), request_frame(0), heartbeat_frame()].concat();
        for chunk_size in [1usize, 3, 7, 11, 300] {
            let mut framer = Framer::new();
            let mut decoded = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                for (result, raw) in framer.process_incoming_data(chunk) {
                    decoded.push((result, raw));
                }
            }
            assert_eq!(decoded.len(), 3, "chunk_size={chunk_size}");
            assert!(matches!(decoded[0].0, Ok(Pdu::HeartbeatRequest(_))));
            // 客户端视角下自己的请求帧会被当成透传响应解码失败，但帧本身被完整消费
            assert_eq!(decoded[1].1, request_frame(0));
            assert!(matches!(decoded[2].0, Ok(Pdu::HeartbeatRequest(_))));
            assert_eq!(framer.buffered_bytes(), 0, "chunk_size={chunk_size}");
        }
    }

    #[test]
    fn resync_discards_garbage_prefix() {
        let mut framer = Framer::new();
        let input = [vec![0xDE, 0xAD, 0xBE, 0xEF], heartbeat_frame()].concat();
        let results = framer.process_incoming_data(&input);
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].0, Ok(Pdu::HeartbeatRequest(_))));
        assert_eq!(framer.buffered_bytes(), 0);
    }

    #[test]
    fn garbage_without_signature_is_retained() {
        let mut framer = Framer::new();
        let garbage = [0xDEu8, 0xAD, 0xBE, 0xEF, 0x00, 0x11, 0x22, 0x33, 0x44];
        assert!(framer.process_incoming_data(&garbage).is_empty());
        // 不静默丢弃：重同步未果前缓冲原样保留
        assert_eq!(framer.buffered_bytes(), garbage.len());
        // 随后到达的合法帧仍能被找到
        let results = framer.process_incoming_data(&heartbeat_frame());
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].0, Ok(Pdu::HeartbeatRequest(_))));
        assert_eq!(framer.buffered_bytes(), 0);
    }

    #[test]
    fn partial_header_waits_for_more_data() {
        let mut framer = Framer::new();
        let frame = heartbeat_frame();
        assert!(framer.process_incoming_data(&frame[..5]).is_empty());
        assert_eq!(framer.buffered_bytes(), 5);
        let results = framer.process_incoming_data(&frame[5..]);
        assert_eq!(results.len(), 1);
        assert_eq!(framer.buffered_bytes(), 0);
    }

    #[test]
    fn corrupt_header_then_valid_frame() {
        // 首帧头部被破坏：签名扫描应跳过它并解出后面的好帧
        let mut bad = heartbeat_frame();
        bad[0] = 0x58;
        let mut framer = Framer::new();
        let input = [bad, heartbeat_frame()].concat();
        let results = framer.process_incoming_data(&input);
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].0, Ok(Pdu::HeartbeatRequest(_))));
        assert_eq!(framer.buffered_bytes(), 0);
    }

    #[test]
    fn undecodable_frame_is_consumed_and_reported() {
        // 头部合法但功能码未知：帧被取走并报 InvalidFrame，后续不受影响
        let mut frame = heartbeat_frame();
        frame[7] = 0x03;
        let mut framer = Framer::new();
        // fid 非 1/2 视为头部不合法 -> 触发重同步而非解码失败
        let input = [frame, heartbeat_frame()].concat();
        let results = framer.process_incoming_data(&input);
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].0, Ok(Pdu::HeartbeatRequest(_))));
    }
}
