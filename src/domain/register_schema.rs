// 寄存器表：每个 bank 内各下标的类型 / 缩放 / 单位 / 可写性的单一事实来源。
// 可写白名单直接来自表中的 write_safe 标记，写请求编码时据此拒绝。
use crate::domain::register::{DataType, RegisterDef, Unit};

const fn d(data_type: DataType, scaling: u16, unit: Unit) -> RegisterDef {
    RegisterDef {
        data_type,
        scaling,
        unit,
        write_safe: false,
    }
}

const fn w(data_type: DataType, scaling: u16, unit: Unit) -> RegisterDef {
    RegisterDef {
        data_type,
        scaling,
        unit,
        write_safe: true,
    }
}

/// 缺省描述：裸 16 位无符号字
const WORD: RegisterDef = d(DataType::Uint16, 1, Unit::None);

/// 保持寄存器描述符；未定义下标返回 None
pub fn holding_def(index: u16) -> Option<RegisterDef> {
    let def = match index {
        0 => d(DataType::Hex, 1, Unit::None), // 设备类型码 0x[01235]xxx
        1 => d(DataType::Uint32High, 1, Unit::None),
        2 => d(DataType::Uint32Low, 1, Unit::None),
        3 => d(DataType::Duint8, 1, Unit::None), // MPPT 数 / 相数
        4..=6 => WORD,
        7 => d(DataType::Bool, 1, Unit::None), // 电流表使能
        8..=12 => d(DataType::Ascii, 1, Unit::None), // 首块电池序列号
        13..=17 => d(DataType::Ascii, 1, Unit::None), // 逆变器序列号
        18 | 19 => WORD,                       // BMS / DSP 固件版本
        20 => w(DataType::Bool, 1, Unit::None), // 充电目标使能
        21 => WORD,                            // ARM 固件版本
        22 => WORD,                            // USB 设备 0:无 1:wifi 2:U 盘
        23 => d(DataType::Bool, 1, Unit::None), // false 为 DSP 选中
        24 => WORD,
        25 => d(DataType::Int16, 1, Unit::None),
        26 => d(DataType::Uint16, 1, Unit::PowerW), // 出口功率上限
        27 => w(DataType::Uint16, 1, Unit::None),   // 电池功率模式 0:出口 1:自发自用
        28 => d(DataType::Bool, 1, Unit::None),     // 60Hz 模式
        29 => WORD,                                 // 电池标定阶段
        30 => d(DataType::Uint8, 1, Unit::None),    // 逆变器 modbus 地址，默认 0x11
        31 | 32 => w(DataType::Time, 1, Unit::None), // 充电时段 2
        33 => WORD,
        34 => d(DataType::Uint16, 100, Unit::None), // modbus 版本
        35..=40 => w(DataType::Uint16, 1, Unit::None), // 系统时间 年..秒
        41 => d(DataType::Bool, 1, Unit::None),
        42 => d(DataType::Bitfield, 1, Unit::None), // CT 极性调整
        43 => d(DataType::Duint8, 1, Unit::None),
        44 | 45 => w(DataType::Time, 1, Unit::None), // 放电时段 2
        46 | 47 => WORD,
        48 | 49 => d(DataType::Bool, 1, Unit::None), // 电表反接
        50 | 51 => d(DataType::Uint16, 1, Unit::Percent), // 有功 / 无功比率
        52 => d(DataType::PowerFactor, 1, Unit::None),
        53 => d(DataType::Duint8, 1, Unit::None), // 高字节自动重启状态，低字节开关机
        54 => WORD,                               // 电池类型 0:铅酸 1:锂
        55 => d(DataType::Uint16, 1, Unit::ChargeAh),
        56 | 57 => w(DataType::Time, 1, Unit::None), // 放电时段 1
        58 => d(DataType::Bool, 1, Unit::None),
        59 => w(DataType::Bool, 1, Unit::None), // 放电使能
        60 => d(DataType::Uint16, 10, Unit::VoltageV),
        61 | 62 => d(DataType::Uint16, 1, Unit::TimeS),
        63 | 64 => d(DataType::Uint16, 10, Unit::VoltageV),
        65 | 66 => d(DataType::Uint16, 100, Unit::FrequencyHz),
        67..=70 => WORD,
        71 | 72 => d(DataType::Uint16, 10, Unit::VoltageV),
        73 | 74 => d(DataType::Uint16, 100, Unit::FrequencyHz),
        75..=78 => WORD,
        79 | 80 => d(DataType::Uint16, 10, Unit::VoltageV),
        81 | 82 => d(DataType::Uint16, 100, Unit::FrequencyHz),
        83 => d(DataType::Uint16, 10, Unit::VoltageV),
        84 | 85 => WORD, // 绝缘阻抗
        86 => d(DataType::Uint16, 1, Unit::CurrentMa),
        87 => WORD,
        88 => d(DataType::Uint16, 1, Unit::CurrentMa),
        89 => WORD,
        90 => d(DataType::Uint16, 1, Unit::CurrentMa),
        91 => WORD,
        92 => d(DataType::Uint16, 1, Unit::CurrentMa),
        93 => WORD,
        94 | 95 => w(DataType::Time, 1, Unit::None), // 充电时段 1
        96 => w(DataType::Bool, 1, Unit::None),      // 充电使能
        97 | 98 => d(DataType::Uint16, 100, Unit::VoltageV), // 电池保护电压
        99..=103 => d(DataType::Uint16, 10, Unit::VoltageV),
        104 => d(DataType::Uint16, 1, Unit::PowerW),
        105 => d(DataType::Uint16, 10, Unit::VoltageV),
        106 | 107 => d(DataType::Uint16, 1, Unit::PowerW),
        108 => d(DataType::Uint16, 1, Unit::TimeMin),
        109 => d(DataType::Bool, 1, Unit::None),
        110 => w(DataType::Uint16, 1, Unit::Percent), // SOC 保留
        111 | 112 => w(DataType::Uint16, 1, Unit::Percent), // 充 / 放电功率百分比上限
        113 => d(DataType::Bool, 1, Unit::None),
        114 => w(DataType::Uint16, 1, Unit::Percent), // 放电最低保留
        115 => WORD,
        116 => w(DataType::Uint16, 1, Unit::Percent), // 充电目标 SOC
        117..=120 => d(DataType::Uint16, 1, Unit::Percent),
        121 => d(DataType::Bool, 1, Unit::None),
        122 | 123 => WORD,
        124..=129 => d(DataType::Bool, 1, Unit::None),
        130 => d(DataType::Uint16, 1, Unit::Percent),
        131 => d(DataType::PowerFactor, 1, Unit::None),
        132 => d(DataType::Uint16, 1, Unit::Percent),
        133 => d(DataType::PowerFactor, 1, Unit::None),
        134 => d(DataType::Uint16, 1, Unit::Percent),
        135 => d(DataType::PowerFactor, 1, Unit::None),
        136 => d(DataType::Uint16, 1, Unit::Percent),
        137 => d(DataType::PowerFactor, 1, Unit::None),
        138..=141 => WORD, // CEI 0-21 阈值
        142 | 143 => d(DataType::Uint16, 1, Unit::Percent),
        144 | 145 => d(DataType::Uint16, 10, Unit::VoltageV),
        146..=162 => WORD,
        163 => w(DataType::Uint16, 1, Unit::Percent), // 写 100 触发重启
        164..=201 => WORD,
        _ => return None,
    };
    Some(def)
}

/// 输入寄存器描述符；[60,120) 段由 BMS 复用
pub fn input_def(index: u16) -> Option<RegisterDef> {
    let def = match index {
        0 => WORD, // 逆变器状态 0:等待 1:正常 2:告警 3:故障 4:升级
        1..=5 => d(DataType::Uint16, 10, Unit::VoltageV),
        6 => d(DataType::Uint32High, 10, Unit::EnergyKwh),
        7 => d(DataType::Uint32Low, 10, Unit::EnergyKwh),
        8 | 9 => d(DataType::Uint16, 10, Unit::CurrentA),
        10 => d(DataType::Uint16, 100, Unit::CurrentA),
        11 => d(DataType::Uint32High, 10, Unit::EnergyKwh),
        12 => d(DataType::Uint32Low, 10, Unit::EnergyKwh),
        13 => d(DataType::Uint16, 100, Unit::FrequencyHz),
        14 | 15 => WORD,
        16 => d(DataType::PowerFactor, 1, Unit::None),
        17 => d(DataType::Uint16, 10, Unit::EnergyKwh),
        18 => d(DataType::Uint16, 1, Unit::PowerW),
        19 => d(DataType::Uint16, 10, Unit::EnergyKwh),
        20 => d(DataType::Uint16, 1, Unit::PowerW),
        21 => d(DataType::Uint32High, 10, Unit::EnergyKwh),
        22 => d(DataType::Uint32Low, 10, Unit::EnergyKwh),
        23 => d(DataType::Uint16, 10, Unit::EnergyKwh),
        24 => d(DataType::Int16, 1, Unit::PowerW),
        25 | 26 => d(DataType::Uint16, 10, Unit::EnergyKwh),
        27 => d(DataType::Uint32High, 10, Unit::EnergyKwh),
        28 => d(DataType::Uint32Low, 10, Unit::EnergyKwh),
        29 => d(DataType::Uint16, 10, Unit::EnergyKwh),
        30 => d(DataType::Int16, 1, Unit::PowerW),
        31 => d(DataType::Uint16, 1, Unit::PowerW),
        32 => d(DataType::Uint32High, 10, Unit::EnergyKwh),
        33 => d(DataType::Uint32Low, 10, Unit::EnergyKwh),
        34 => WORD,
        35..=37 => d(DataType::Uint16, 10, Unit::EnergyKwh),
        38 => d(DataType::Uint16, 1, Unit::TimeS),
        39 | 40 => d(DataType::Bitfield, 1, Unit::None), // 故障码高 / 低
        41 => d(DataType::Uint16, 10, Unit::TemperatureC),
        42 => d(DataType::Uint16, 1, Unit::PowerW),
        43 => d(DataType::Uint16, 1, Unit::PowerVa),
        44 => d(DataType::Uint16, 10, Unit::EnergyKwh),
        45 => d(DataType::Uint32High, 10, Unit::EnergyKwh),
        46 => d(DataType::Uint32Low, 10, Unit::EnergyKwh),
        47 => d(DataType::Uint32High, 1, Unit::TimeS),
        48 => d(DataType::Uint32Low, 1, Unit::TimeS),
        49 => WORD, // 0:离网 1:并网
        50 => d(DataType::Uint16, 100, Unit::VoltageV),
        51 => d(DataType::Int16, 100, Unit::CurrentA),
        52 => d(DataType::Int16, 1, Unit::PowerW),
        53 => d(DataType::Uint16, 10, Unit::VoltageV),
        54 => d(DataType::Uint16, 100, Unit::FrequencyHz),
        55 | 56 => d(DataType::Uint16, 10, Unit::TemperatureC),
        57 => WORD,
        58 => d(DataType::Uint16, 100, Unit::CurrentA),
        59 => d(DataType::Uint16, 1, Unit::Percent),

        // 以下为 BMS 段（电池从机地址下有效）
        60..=75 => d(DataType::Uint16, 1000, Unit::VoltageV), // 单体电压
        76..=79 => d(DataType::Uint16, 10, Unit::TemperatureC),
        80 => d(DataType::Uint16, 1000, Unit::VoltageV),
        81 => d(DataType::Uint16, 10, Unit::TemperatureC),
        82 => d(DataType::Uint32High, 1000, Unit::VoltageV),
        83 => d(DataType::Uint32Low, 1000, Unit::VoltageV),
        84 => d(DataType::Uint32High, 100, Unit::ChargeAh),
        85 => d(DataType::Uint32Low, 100, Unit::ChargeAh),
        86 => d(DataType::Uint32High, 100, Unit::ChargeAh),
        87 => d(DataType::Uint32Low, 100, Unit::ChargeAh),
        88 => d(DataType::Uint32High, 100, Unit::ChargeAh),
        89 => d(DataType::Uint32Low, 100, Unit::ChargeAh),
        90..=94 => d(DataType::Duint8, 1, Unit::None), // 状态 / 告警对
        95 => WORD,
        96..=99 => WORD, // 循环数 / 电芯数 / BMS 固件
        100 => WORD,     // SOC
        101 => d(DataType::Uint32High, 100, Unit::ChargeAh),
        102 => d(DataType::Uint32Low, 100, Unit::ChargeAh),
        103 | 104 => d(DataType::Uint16, 10, Unit::TemperatureC),
        105 | 106 => d(DataType::Uint16, 10, Unit::EnergyKwh),
        107..=109 => WORD,
        110..=114 => d(DataType::Ascii, 1, Unit::None), // BMS 序列号
        115 => d(DataType::Bitfield, 1, Unit::None),    // 0x08 表示插入
        116..=179 => WORD,

        180..=183 => d(DataType::Uint16, 10, Unit::EnergyKwh),
        184..=200 => WORD,
        201 => d(DataType::Bool, 1, Unit::None), // 远程 BMS 重启
        202..=209 => WORD,
        210 => d(DataType::Uint16, 10, Unit::VoltageV),
        211 => d(DataType::Uint16, 1, Unit::CurrentMa),
        212 => d(DataType::Uint16, 100, Unit::CurrentA),
        213 | 214 => d(DataType::Uint16, 10, Unit::VoltageV),
        215 => d(DataType::Uint16, 100, Unit::FrequencyHz),
        216 => d(DataType::Uint16, 10, Unit::TemperatureC),
        217..=224 => WORD,
        225 => d(DataType::Bitfield, 1, Unit::None), // 自检过程 / 步骤
        226..=228 => WORD,
        229 => d(DataType::Uint16, 10, Unit::VoltageV),
        230 => d(DataType::Uint16, 1, Unit::TimeMs),
        231..=233 => d(DataType::Uint16, 10, Unit::VoltageV),
        234 => d(DataType::Uint16, 1, Unit::TimeMs),
        235..=239 => WORD,
        _ => return None,
    };
    Some(def)
}

/// 保持寄存器是否允许写入
pub fn is_write_safe(index: u16) -> bool {
    holding_def(index).map(|d| d.write_safe).unwrap_or(false)
}

/// 常用保持寄存器地址
pub mod holding {
    pub const DEVICE_TYPE_CODE: u16 = 0;
    pub const INVERTER_MODULE_H: u16 = 1;
    pub const INVERTER_MODULE_L: u16 = 2;
    pub const NUM_MPPT_AND_NUM_PHASES: u16 = 3;
    pub const ENABLE_AMMETER: u16 = 7;
    pub const FIRST_BATTERY_SERIAL_NUMBER_START: u16 = 8; // 8..=12
    pub const SERIAL_NUMBER_START: u16 = 13; // 13..=17
    pub const FIRST_BATTERY_BMS_FIRMWARE_VERSION: u16 = 18;
    pub const DSP_FIRMWARE_VERSION: u16 = 19;
    pub const ENABLE_CHARGE_TARGET: u16 = 20;
    pub const ARM_FIRMWARE_VERSION: u16 = 21;
    pub const USB_DEVICE_INSERTED: u16 = 22;
    pub const SELECT_ARM_CHIP: u16 = 23;
    pub const GRID_PORT_MAX_POWER_OUTPUT: u16 = 26;
    pub const BATTERY_POWER_MODE: u16 = 27;
    pub const ENABLE_60HZ_FREQ_MODE: u16 = 28;
    pub const SOC_FORCE_ADJUST: u16 = 29;
    pub const INVERTER_MODBUS_ADDRESS: u16 = 30;
    pub const CHARGE_SLOT_2_START: u16 = 31;
    pub const CHARGE_SLOT_2_END: u16 = 32;
    pub const MODBUS_VERSION: u16 = 34;
    pub const SYSTEM_TIME_YEAR: u16 = 35;
    pub const SYSTEM_TIME_MONTH: u16 = 36;
    pub const SYSTEM_TIME_DAY: u16 = 37;
    pub const SYSTEM_TIME_HOUR: u16 = 38;
    pub const SYSTEM_TIME_MINUTE: u16 = 39;
    pub const SYSTEM_TIME_SECOND: u16 = 40;
    pub const DISCHARGE_SLOT_2_START: u16 = 44;
    pub const DISCHARGE_SLOT_2_END: u16 = 45;
    pub const ACTIVE_POWER_RATE: u16 = 50;
    pub const DISCHARGE_SLOT_1_START: u16 = 56;
    pub const DISCHARGE_SLOT_1_END: u16 = 57;
    pub const ENABLE_DISCHARGE: u16 = 59;
    pub const CHARGE_SLOT_1_START: u16 = 94;
    pub const CHARGE_SLOT_1_END: u16 = 95;
    pub const ENABLE_CHARGE: u16 = 96;
    pub const BATTERY_SOC_RESERVE: u16 = 110;
    pub const BATTERY_CHARGE_LIMIT: u16 = 111;
    pub const BATTERY_DISCHARGE_LIMIT: u16 = 112;
    pub const BATTERY_DISCHARGE_MIN_POWER_RESERVE: u16 = 114;
    pub const CHARGE_TARGET_SOC: u16 = 116;
    pub const INVERTER_REBOOT: u16 = 163;
}

/// 常用输入寄存器地址
pub mod input {
    pub const INVERTER_STATUS: u16 = 0;
    pub const V_PV1: u16 = 1;
    pub const V_PV2: u16 = 2;
    pub const V_P_BUS: u16 = 3;
    pub const V_N_BUS: u16 = 4;
    pub const V_AC1: u16 = 5;
    pub const E_BATTERY_THROUGHPUT_TOTAL_H: u16 = 6;
    pub const E_BATTERY_THROUGHPUT_TOTAL_L: u16 = 7;
    pub const I_PV1: u16 = 8;
    pub const I_PV2: u16 = 9;
    pub const I_AC1: u16 = 10;
    pub const E_PV_TOTAL_H: u16 = 11;
    pub const E_PV_TOTAL_L: u16 = 12;
    pub const F_AC1: u16 = 13;
    pub const CHARGE_STATUS: u16 = 14;
    pub const PF_INVERTER_OUT: u16 = 16;
    pub const E_PV1_DAY: u16 = 17;
    pub const P_PV1: u16 = 18;
    pub const E_PV2_DAY: u16 = 19;
    pub const P_PV2: u16 = 20;
    pub const E_GRID_OUT_TOTAL_H: u16 = 21;
    pub const E_GRID_OUT_TOTAL_L: u16 = 22;
    pub const E_SOLAR_DIVERTER: u16 = 23;
    pub const P_INVERTER_OUT: u16 = 24;
    pub const E_GRID_OUT_DAY: u16 = 25;
    pub const E_GRID_IN_DAY: u16 = 26;
    pub const E_INVERTER_IN_TOTAL_H: u16 = 27;
    pub const E_INVERTER_IN_TOTAL_L: u16 = 28;
    pub const E_DISCHARGE_YEAR: u16 = 29;
    pub const P_GRID_OUT: u16 = 30;
    pub const P_EPS_BACKUP: u16 = 31;
    pub const E_GRID_IN_TOTAL_H: u16 = 32;
    pub const E_GRID_IN_TOTAL_L: u16 = 33;
    pub const E_INVERTER_IN_DAY: u16 = 35;
    pub const E_BATTERY_CHARGE_DAY: u16 = 36;
    pub const E_BATTERY_DISCHARGE_DAY: u16 = 37;
    pub const INVERTER_COUNTDOWN: u16 = 38;
    pub const FAULT_CODE_H: u16 = 39;
    pub const FAULT_CODE_L: u16 = 40;
    pub const TEMP_INVERTER_HEATSINK: u16 = 41;
    pub const P_LOAD_DEMAND: u16 = 42;
    pub const P_GRID_APPARENT: u16 = 43;
    pub const E_INVERTER_OUT_DAY: u16 = 44;
    pub const E_INVERTER_OUT_TOTAL_H: u16 = 45;
    pub const E_INVERTER_OUT_TOTAL_L: u16 = 46;
    pub const WORK_TIME_TOTAL_H: u16 = 47;
    pub const WORK_TIME_TOTAL_L: u16 = 48;
    pub const SYSTEM_MODE: u16 = 49;
    pub const V_BATTERY: u16 = 50;
    pub const I_BATTERY: u16 = 51;
    pub const P_BATTERY: u16 = 52;
    pub const V_EPS_BACKUP: u16 = 53;
    pub const F_EPS_BACKUP: u16 = 54;
    pub const TEMP_CHARGER: u16 = 55;
    pub const TEMP_BATTERY: u16 = 56;
    pub const CHARGER_WARNING_CODE: u16 = 57;
    pub const I_GRID_PORT: u16 = 58;
    pub const BATTERY_PERCENT: u16 = 59;

    pub const V_CELL_START: u16 = 60; // 60..=75
    pub const TEMP_CELLS_START: u16 = 76; // 76..=79
    pub const V_CELLS_SUM: u16 = 80;
    pub const TEMP_BMS_MOS: u16 = 81;
    pub const V_BATTERY_OUT_H: u16 = 82;
    pub const V_BATTERY_OUT_L: u16 = 83;
    pub const FULL_CAPACITY_H: u16 = 84;
    pub const FULL_CAPACITY_L: u16 = 85;
    pub const DESIGN_CAPACITY_H: u16 = 86;
    pub const DESIGN_CAPACITY_L: u16 = 87;
    pub const REMAINING_CAPACITY_H: u16 = 88;
    pub const REMAINING_CAPACITY_L: u16 = 89;
    pub const STATUS_1_2: u16 = 90;
    pub const STATUS_3_4: u16 = 91;
    pub const STATUS_5_6: u16 = 92;
    pub const STATUS_7: u16 = 93;
    pub const WARNING_1_2: u16 = 94;
    pub const NUM_CYCLES: u16 = 96;
    pub const NUM_CELLS: u16 = 97;
    pub const BMS_FIRMWARE_VERSION: u16 = 98;
    pub const SOC: u16 = 100;
    pub const DESIGN_CAPACITY_2_H: u16 = 101;
    pub const DESIGN_CAPACITY_2_L: u16 = 102;
    pub const TEMP_MAX: u16 = 103;
    pub const TEMP_MIN: u16 = 104;
    pub const E_DISCHARGE_TOTAL: u16 = 105;
    pub const E_CHARGE_TOTAL: u16 = 106;
    pub const BATTERY_SERIAL_NUMBER_START: u16 = 110; // 110..=114
    pub const USB_INSERTED: u16 = 115;

    pub const E_BATTERY_DISCHARGE_TOTAL: u16 = 180;
    pub const E_BATTERY_CHARGE_TOTAL: u16 = 181;
    pub const E_BATTERY_DISCHARGE_DAY_2: u16 = 182;
    pub const E_BATTERY_CHARGE_DAY_2: u16 = 183;
}
