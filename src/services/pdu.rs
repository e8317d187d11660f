// PDU 族：主功能码 1/心跳 与 2/透传 下的请求、响应报文。
// 每个变体既是数据结构也是编解码器；shape hash 用于把响应配回请求并去重。
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use log::warn;

use crate::domain::register::Register;
use crate::domain::register_schema;
use crate::error::{Error, Result};
use crate::services::codec::{PayloadDecoder, PayloadEncoder};

/// 请求侧适配器序列号；设备并不校验该字段
pub const DEFAULT_ADAPTER_SERIAL: &str = "AB1234G567";

/// 逆变器从机地址（写命令的目标）
pub const SLAVE_INVERTER: u8 = 0x11;
/// 第一块电池 / 云侧数据从机地址（读命令的默认目标）
pub const SLAVE_DATA: u8 = 0x32;

/// 请求侧 padding；语义未完全逆向，按观测值固定
pub const PADDING_REQUEST: u64 = 0x8;
/// 正常响应 padding 观测值
pub const PADDING_RESPONSE: u64 = 0x8A;
/// 错误响应 padding 观测值
pub const PADDING_ERROR: u64 = 0x12;

const MBAP_TID: u16 = 0x5959;
const MBAP_PID: u16 = 0x0001;
const MBAP_UID: u8 = 0x01;

pub const MAIN_HEARTBEAT: u8 = 1;
pub const MAIN_TRANSPARENT: u8 = 2;

const INNER_NULL: u8 = 0;
const INNER_READ_HOLDING: u8 = 3;
const INNER_READ_INPUT: u8 = 4;
const INNER_WRITE_HOLDING: u8 = 6;

/// 空响应固定携带的零字数量
const NULL_RESPONSE_WORDS: usize = 62;

// ------------------------------------------------------------------------------------------------

/// 数据适配器发来的活性探测；客户端须在 5 秒内回发镜像响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatRequest {
    pub data_adapter_serial_number: String,
    pub data_adapter_type: u8,
}

impl HeartbeatRequest {
    /// 镜像出应答：序列号与适配器类型原样回传
    pub fn expected_response(&self) -> HeartbeatResponse {
        HeartbeatResponse {
            data_adapter_serial_number: self.data_adapter_serial_number.clone(),
            data_adapter_type: self.data_adapter_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatResponse {
    pub data_adapter_serial_number: String,
    pub data_adapter_type: u8,
}

// ------------------------------------------------------------------------------------------------

/// 客户端发出的透传请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransparentRequest {
    pub data_adapter_serial_number: String,
    pub padding: u64,
    pub slave_address: u8,
    pub kind: TransparentRequestKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransparentRequestKind {
    ReadHoldingRegisters { base_register: u16, register_count: u16 },
    ReadInputRegisters { base_register: u16, register_count: u16 },
    WriteHoldingRegister { register: u16, value: u16 },
}

impl TransparentRequest {
    pub fn read_holding_registers(base_register: u16, register_count: u16, slave_address: u8) -> Self {
        Self {
            data_adapter_serial_number: DEFAULT_ADAPTER_SERIAL.to_string(),
            padding: PADDING_REQUEST,
            slave_address,
            kind: TransparentRequestKind::ReadHoldingRegisters {
                base_register,
                register_count,
            },
        }
    }

    pub fn read_input_registers(base_register: u16, register_count: u16, slave_address: u8) -> Self {
        Self {
            data_adapter_serial_number: DEFAULT_ADAPTER_SERIAL.to_string(),
            padding: PADDING_REQUEST,
            slave_address,
            kind: TransparentRequestKind::ReadInputRegisters {
                base_register,
                register_count,
            },
        }
    }

    /// 写保持寄存器；目标固定为逆变器从机
    pub fn write_holding_register(register: u16, value: u16) -> Self {
        Self {
            data_adapter_serial_number: DEFAULT_ADAPTER_SERIAL.to_string(),
            padding: PADDING_REQUEST,
            slave_address: SLAVE_INVERTER,
            kind: TransparentRequestKind::WriteHoldingRegister { register, value },
        }
    }

    pub fn inner_function_code(&self) -> u8 {
        match self.kind {
            TransparentRequestKind::ReadHoldingRegisters { .. } => INNER_READ_HOLDING,
            TransparentRequestKind::ReadInputRegisters { .. } => INNER_READ_INPUT,
            TransparentRequestKind::WriteHoldingRegister { .. } => INNER_WRITE_HOLDING,
        }
    }

    /// 编码前的状态自检；写请求在此处挡下白名单之外的寄存器
    pub fn ensure_valid_state(&self) -> Result<()> {
        match self.kind {
            TransparentRequestKind::ReadHoldingRegisters {
                base_register,
                register_count,
            }
            | TransparentRequestKind::ReadInputRegisters {
                base_register,
                register_count,
            } => {
                if register_count == 0 || register_count > 60 {
                    return Err(Error::InvalidPduState {
                        reason: format!("寄存器数量 {register_count} 不在 (0,60] 内"),
                        quirk: false,
                    });
                }
                if register_count != 1 && base_register % 60 != 0 {
                    warn!("基址 {base_register} 未按 60 对齐，设备可能拒绝");
                }
                Ok(())
            }
            TransparentRequestKind::WriteHoldingRegister { register, .. } => {
                if !register_schema::is_write_safe(register) {
                    return Err(Error::InvalidPduState {
                        reason: format!("HR:{register} 不在可写白名单内"),
                        quirk: false,
                    });
                }
                Ok(())
            }
        }
    }

    /// 该请求应得响应的形状模板（值域字段留空）
    pub fn expected_response(&self) -> TransparentResponse {
        let kind = match self.kind {
            TransparentRequestKind::ReadHoldingRegisters {
                base_register,
                register_count,
            } => TransparentResponseKind::ReadHoldingRegisters {
                base_register,
                register_count,
                register_values: Vec::new(),
            },
            TransparentRequestKind::ReadInputRegisters {
                base_register,
                register_count,
            } => TransparentResponseKind::ReadInputRegisters {
                base_register,
                register_count,
                register_values: Vec::new(),
            },
            TransparentRequestKind::WriteHoldingRegister { register, value } => {
                TransparentResponseKind::WriteHoldingRegister { register, value }
            }
        };
        TransparentResponse {
            data_adapter_serial_number: String::new(),
            padding: PADDING_RESPONSE,
            slave_address: self.slave_address,
            error: false,
            inverter_serial_number: String::new(),
            check: 0,
            kind,
        }
    }

    fn encode_into(&self, e: &mut PayloadEncoder) {
        e.add_serial_number(&self.data_adapter_serial_number);
        e.add_u64(self.padding);
        e.add_u8(self.slave_address);
        e.add_u8(self.inner_function_code());
        // CRC 覆盖 inner_fc ∥ 功能域字节
        let mut crc = PayloadEncoder::new();
        crc.add_u8(self.inner_function_code());
        match self.kind {
            TransparentRequestKind::ReadHoldingRegisters {
                base_register,
                register_count,
            }
            | TransparentRequestKind::ReadInputRegisters {
                base_register,
                register_count,
            } => {
                e.add_u16(base_register);
                e.add_u16(register_count);
                crc.add_u16(base_register);
                crc.add_u16(register_count);
            }
            TransparentRequestKind::WriteHoldingRegister { register, value } => {
                e.add_u16(register);
                e.add_u16(value);
                crc.add_u16(register);
                crc.add_u16(value);
            }
        }
        e.add_u16(crc.calculate_crc());
    }

    fn decode_from(d: &mut PayloadDecoder<'_>) -> Result<Self> {
        let data_adapter_serial_number = d.decode_serial_number()?;
        let padding = d.decode_u64()?;
        let slave_address = d.decode_u8()?;
        let inner = d.decode_u8()?;
        let kind = match inner & 0x7F {
            INNER_READ_HOLDING => TransparentRequestKind::ReadHoldingRegisters {
                base_register: d.decode_u16()?,
                register_count: d.decode_u16()?,
            },
            INNER_READ_INPUT => TransparentRequestKind::ReadInputRegisters {
                base_register: d.decode_u16()?,
                register_count: d.decode_u16()?,
            },
            INNER_WRITE_HOLDING => {
                let register = d.decode_u16()?;
                let value = d.decode_u16()?;
                TransparentRequestKind::WriteHoldingRegister { register, value }
            }
            other => {
                return Err(Error::InvalidFrame {
                    reason: format!("未知的透传请求功能码 0x{other:02x}"),
                })
            }
        };
        let _check = d.decode_u16()?;
        Ok(Self {
            data_adapter_serial_number,
            padding,
            slave_address,
            kind,
        })
    }

    fn hash_shape<H: Hasher>(&self, h: &mut H) {
        self.inner_function_code().hash(h);
        self.slave_address.hash(h);
        match self.kind {
            TransparentRequestKind::ReadHoldingRegisters {
                base_register,
                register_count,
            }
            | TransparentRequestKind::ReadInputRegisters {
                base_register,
                register_count,
            } => {
                base_register.hash(h);
                register_count.hash(h);
            }
            TransparentRequestKind::WriteHoldingRegister { register, .. } => {
                register.hash(h);
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------

/// 设备发回的透传响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransparentResponse {
    pub data_adapter_serial_number: String,
    pub padding: u64,
    pub slave_address: u8,
    /// 内层功能码最高位镜像下来的错误标志
    pub error: bool,
    pub inverter_serial_number: String,
    /// 响应侧校验和算法未知，仅存储不校验
    pub check: u16,
    pub kind: TransparentResponseKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransparentResponseKind {
    ReadHoldingRegisters {
        base_register: u16,
        register_count: u16,
        register_values: Vec<u16>,
    },
    ReadInputRegisters {
        base_register: u16,
        register_count: u16,
        register_values: Vec<u16>,
    },
    WriteHoldingRegister {
        register: u16,
        value: u16,
    },
    /// 设备不定期主动发出的全零帧
    Null,
}

impl TransparentResponse {
    pub fn inner_function_code(&self) -> u8 {
        match self.kind {
            TransparentResponseKind::ReadHoldingRegisters { .. } => INNER_READ_HOLDING,
            TransparentResponseKind::ReadInputRegisters { .. } => INNER_READ_INPUT,
            TransparentResponseKind::WriteHoldingRegister { .. } => INNER_WRITE_HOLDING,
            TransparentResponseKind::Null => INNER_NULL,
        }
    }

    /// 读 / 写响应携带的寄存器内容，展开为 (寄存器, 原始值) 对；
    /// 错误响应与空响应不贡献任何条目
    pub fn register_entries(&self) -> Vec<(Register, u16)> {
        if self.error {
            return Vec::new();
        }
        match &self.kind {
            TransparentResponseKind::ReadHoldingRegisters {
                base_register,
                register_values,
                ..
            } => register_values
                .iter()
                .enumerate()
                .map(|(i, v)| (Register::Holding(base_register + i as u16), *v))
                .collect(),
            TransparentResponseKind::ReadInputRegisters {
                base_register,
                register_values,
                ..
            } => register_values
                .iter()
                .enumerate()
                .map(|(i, v)| (Register::Input(base_register + i as u16), *v))
                .collect(),
            TransparentResponseKind::WriteHoldingRegister { register, value } => {
                vec![(Register::Holding(*register), *value)]
            }
            TransparentResponseKind::Null => Vec::new(),
        }
    }

    /// 解码后的状态自检。padding 不符只告警；
    /// 空序列号的 BMS 回显按已知特例（quirk）报错，调用方归档后丢弃即可。
    pub fn ensure_valid_state(&self) -> Result<()> {
        let expected_padding = if self.error { PADDING_ERROR } else { PADDING_RESPONSE };
        if self.padding != expected_padding {
            warn!(
                "padding 期望 0x{expected_padding:x}，实际 0x{:x}（不致命）",
                self.padding
            );
        }
        match &self.kind {
            TransparentResponseKind::ReadHoldingRegisters {
                base_register,
                register_count,
                ..
            }
            | TransparentResponseKind::ReadInputRegisters {
                base_register,
                register_count,
                ..
            } => {
                if !self.error && *register_count != 1 && base_register % 60 != 0 {
                    warn!("响应基址 {base_register} 未按 60 对齐");
                }
            }
            TransparentResponseKind::WriteHoldingRegister { register, .. } => {
                if !self.error && !register_schema::is_write_safe(*register) {
                    warn!("写响应落在白名单之外的 HR:{register}");
                }
            }
            TransparentResponseKind::Null => {
                if self.inverter_serial_number.chars().any(|c| c != '\0') {
                    warn!(
                        "空响应携带非 NUL 逆变器序列号: {:?}",
                        self.inverter_serial_number
                    );
                }
            }
        }
        if self.is_suspicious_bms_echo() {
            return Err(Error::InvalidPduState {
                reason: "BMS 数据携带全空序列号，电池大概率未安装".to_string(),
                quirk: true,
            });
        }
        Ok(())
    }

    /// 设备会为不存在的电池从机回显 IR[60..120) 帧，序列号寄存器全零
    fn is_suspicious_bms_echo(&self) -> bool {
        if self.error || !(0x30..=0x37).contains(&self.slave_address) {
            return false;
        }
        match &self.kind {
            TransparentResponseKind::ReadInputRegisters {
                base_register: 60,
                register_count: 60,
                register_values,
            } => register_values.len() == 60 && register_values[50..55].iter().all(|v| *v == 0),
            _ => false,
        }
    }

    fn encode_into(&self, e: &mut PayloadEncoder) {
        e.add_serial_number(&self.data_adapter_serial_number);
        e.add_u64(self.padding);
        e.add_u8(self.slave_address);
        let fc = if self.error {
            self.inner_function_code() | 0x80
        } else {
            self.inner_function_code()
        };
        e.add_u8(fc);
        e.add_serial_number(&self.inverter_serial_number);
        match &self.kind {
            TransparentResponseKind::ReadHoldingRegisters {
                base_register,
                register_count,
                register_values,
            }
            | TransparentResponseKind::ReadInputRegisters {
                base_register,
                register_count,
                register_values,
            } => {
                e.add_u16(*base_register);
                e.add_u16(*register_count);
                if !self.error {
                    for v in register_values {
                        e.add_u16(*v);
                    }
                }
            }
            TransparentResponseKind::WriteHoldingRegister { register, value } => {
                e.add_u16(*register);
                e.add_u16(1);
                e.add_u16(*value);
            }
            TransparentResponseKind::Null => {
                for _ in 0..NULL_RESPONSE_WORDS {
                    e.add_u16(0);
                }
            }
        }
        // 响应校验和无法重算，原样写回
        e.add_u16(self.check);
    }

    fn decode_from(d: &mut PayloadDecoder<'_>) -> Result<Self> {
        let data_adapter_serial_number = d.decode_serial_number()?;
        let padding = d.decode_u64()?;
        let slave_address = d.decode_u8()?;
        let inner = d.decode_u8()?;
        let error = inner & 0x80 != 0;
        let inverter_serial_number = d.decode_serial_number()?;
        let kind = match inner & 0x7F {
            INNER_READ_HOLDING | INNER_READ_INPUT => {
                let base_register = d.decode_u16()?;
                let register_count = d.decode_u16()?;
                let mut register_values = Vec::new();
                if !error {
                    register_values.reserve(register_count as usize);
                    for _ in 0..register_count {
                        register_values.push(d.decode_u16()?);
                    }
                }
                if inner & 0x7F == INNER_READ_HOLDING {
                    TransparentResponseKind::ReadHoldingRegisters {
                        base_register,
                        register_count,
                        register_values,
                    }
                } else {
                    TransparentResponseKind::ReadInputRegisters {
                        base_register,
                        register_count,
                        register_values,
                    }
                }
            }
            INNER_WRITE_HOLDING => {
                let register = d.decode_u16()?;
                let count = d.decode_u16()?;
                if count != 1 {
                    return Err(Error::InvalidPduState {
                        reason: format!("写响应携带 {count} 个值，应为 1"),
                        quirk: false,
                    });
                }
                let value = d.decode_u16()?;
                TransparentResponseKind::WriteHoldingRegister { register, value }
            }
            INNER_NULL => {
                let mut nonzero = 0usize;
                for _ in 0..NULL_RESPONSE_WORDS {
                    if d.decode_u16()? != 0 {
                        nonzero += 1;
                    }
                }
                if nonzero > 0 {
                    warn!("空响应携带 {nonzero} 个非零字");
                }
                TransparentResponseKind::Null
            }
            other => {
                return Err(Error::InvalidFrame {
                    reason: format!("未知的透传响应功能码 0x{other:02x}"),
                })
            }
        };
        let check = d.decode_u16()?;
        Ok(Self {
            data_adapter_serial_number,
            padding,
            slave_address,
            error,
            inverter_serial_number,
            check,
            kind,
        })
    }

    fn hash_shape<H: Hasher>(&self, h: &mut H) {
        self.inner_function_code().hash(h);
        match &self.kind {
            TransparentResponseKind::ReadHoldingRegisters {
                base_register,
                register_count,
                ..
            }
            | TransparentResponseKind::ReadInputRegisters {
                base_register,
                register_count,
                ..
            } => {
                self.slave_address.hash(h);
                base_register.hash(h);
                register_count.hash(h);
            }
            TransparentResponseKind::WriteHoldingRegister { register, .. } => {
                self.slave_address.hash(h);
                register.hash(h);
            }
            // 空响应不区分从机
            TransparentResponseKind::Null => {}
        }
    }
}

// ------------------------------------------------------------------------------------------------

/// 报文总和类型
#[derive(Debug, Clone, PartialEq)]
pub enum Pdu {
    HeartbeatRequest(HeartbeatRequest),
    HeartbeatResponse(HeartbeatResponse),
    TransparentRequest(TransparentRequest),
    TransparentResponse(TransparentResponse),
}

impl Pdu {
    pub fn main_function_code(&self) -> u8 {
        match self {
            Pdu::HeartbeatRequest(_) | Pdu::HeartbeatResponse(_) => MAIN_HEARTBEAT,
            Pdu::TransparentRequest(_) | Pdu::TransparentResponse(_) => MAIN_TRANSPARENT,
        }
    }

    /// 编码为帧体（序列号起，不含 MBAP 头）；编码前先做状态自检
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.ensure_valid_state()?;
        let mut e = PayloadEncoder::new();
        match self {
            Pdu::HeartbeatRequest(hb) => {
                e.add_serial_number(&hb.data_adapter_serial_number);
                e.add_u8(hb.data_adapter_type);
            }
            Pdu::HeartbeatResponse(hb) => {
                e.add_serial_number(&hb.data_adapter_serial_number);
                e.add_u8(hb.data_adapter_type);
            }
            Pdu::TransparentRequest(req) => req.encode_into(&mut e),
            Pdu::TransparentResponse(resp) => resp.encode_into(&mut e),
        }
        Ok(e.into_bytes())
    }

    pub fn ensure_valid_state(&self) -> Result<()> {
        match self {
            Pdu::HeartbeatRequest(_) | Pdu::HeartbeatResponse(_) => Ok(()),
            Pdu::TransparentRequest(req) => req.ensure_valid_state(),
            Pdu::TransparentResponse(resp) => resp.ensure_valid_state(),
        }
    }

    /// 客户端视角解码一个完整帧（含 MBAP 头）：
    /// fid=1 是心跳请求，fid=2 是透传响应
    pub fn decode_incoming(frame: &[u8]) -> Result<Pdu> {
        let (fid, mut d) = parse_mbap(frame)?;
        let pdu = match fid {
            MAIN_HEARTBEAT => Pdu::HeartbeatRequest(HeartbeatRequest {
                data_adapter_serial_number: d.decode_serial_number()?,
                data_adapter_type: d.decode_u8()?,
            }),
            MAIN_TRANSPARENT => Pdu::TransparentResponse(TransparentResponse::decode_from(&mut d)?),
            other => {
                return Err(Error::InvalidFrame {
                    reason: format!("未知主功能码 0x{other:02x}"),
                })
            }
        };
        if !d.decoding_complete() {
            warn!(
                "帧未被完全消费，剩余 {} 字节: {:02x?}",
                d.remaining_bytes(),
                d.remaining_payload()
            );
        }
        pdu.ensure_valid_state()?;
        Ok(pdu)
    }

    /// 服务端视角解码（客户端发出的帧）：fid=1 是心跳响应，fid=2 是透传请求。
    /// 用于回环测试与对拍。
    pub fn decode_outgoing(frame: &[u8]) -> Result<Pdu> {
        let (fid, mut d) = parse_mbap(frame)?;
        let pdu = match fid {
            MAIN_HEARTBEAT => Pdu::HeartbeatResponse(HeartbeatResponse {
                data_adapter_serial_number: d.decode_serial_number()?,
                data_adapter_type: d.decode_u8()?,
            }),
            MAIN_TRANSPARENT => Pdu::TransparentRequest(TransparentRequest::decode_from(&mut d)?),
            other => {
                return Err(Error::InvalidFrame {
                    reason: format!("未知主功能码 0x{other:02x}"),
                })
            }
        };
        if !d.decoding_complete() {
            warn!("帧未被完全消费，剩余 {} 字节", d.remaining_bytes());
        }
        Ok(pdu)
    }

    /// 报文形状指纹：种类、功能码与定位键参与，值域（寄存器内容、写入值）不参与
    pub fn shape_hash(&self) -> u64 {
        let mut h = DefaultHasher::new();
        match self {
            Pdu::HeartbeatRequest(hb) => {
                0u8.hash(&mut h);
                MAIN_HEARTBEAT.hash(&mut h);
                hb.data_adapter_type.hash(&mut h);
            }
            Pdu::HeartbeatResponse(hb) => {
                1u8.hash(&mut h);
                MAIN_HEARTBEAT.hash(&mut h);
                hb.data_adapter_type.hash(&mut h);
            }
            Pdu::TransparentRequest(req) => {
                2u8.hash(&mut h);
                MAIN_TRANSPARENT.hash(&mut h);
                req.hash_shape(&mut h);
            }
            Pdu::TransparentResponse(resp) => {
                3u8.hash(&mut h);
                MAIN_TRANSPARENT.hash(&mut h);
                resp.hash_shape(&mut h);
            }
        }
        h.finish()
    }
}

/// 校验 MBAP 头并返回 (fid, 指向帧体的游标)。
/// 厂商方言：length 比标准 Modbus-TCP 多记 1 字节（含 uid 与 fid）。
fn parse_mbap<'a>(frame: &'a [u8]) -> Result<(u8, PayloadDecoder<'a>)> {
    let mut d = PayloadDecoder::new(frame);
    let tid = d.decode_u16()?;
    if tid != MBAP_TID {
        return Err(Error::InvalidFrame {
            reason: format!("事务标识 0x{tid:04x} != 0x5959"),
        });
    }
    let pid = d.decode_u16()?;
    if pid != MBAP_PID {
        return Err(Error::InvalidFrame {
            reason: format!("协议标识 0x{pid:04x} != 0x0001"),
        });
    }
    let length = d.decode_u16()?;
    if length as usize != d.remaining_bytes() {
        return Err(Error::InvalidFrame {
            reason: format!(
                "头部 length={length} 与实际剩余 {} 字节不符",
                d.remaining_bytes()
            ),
        });
    }
    let uid = d.decode_u8()?;
    if uid != MBAP_UID {
        return Err(Error::InvalidFrame {
            reason: format!("单元标识 0x{uid:02x} != 0x01"),
        });
    }
    let fid = d.decode_u8()?;
    Ok((fid, d))
}
