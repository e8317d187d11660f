// 监视器入口：构造客户端后常驻刷新并打印电站摘要。
// 仅是核心库的薄包装；用法: givenergy-modbus <host> [port] [电池数]
use anyhow::{bail, Context};
use log::LevelFilter;

use givenergy_modbus::{ModbusClient, ModbusClientConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("givenergy_modbus", LevelFilter::Debug)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        bail!("用法: {} <host> [port] [电池数]", args[0]);
    }
    let mut config = ModbusClientConfig {
        host: args[1].clone(),
        ..Default::default()
    };
    if let Some(port) = args.get(2) {
        config.port = port.parse().context("端口号不合法")?;
    }
    if let Some(batteries) = args.get(3) {
        config.number_batteries = batteries.parse().context("电池数不合法")?;
    }

    log::info!("=== GivEnergy Modbus 监视器启动 ===");
    log::info!(
        "目标: {}:{}，电池 {} 块",
        config.host,
        config.port,
        config.number_batteries
    );

    let mut client = ModbusClient::new(config);
    client
        .watch_plant(|plant| {
            match plant.inverter() {
                Some(inverter) => {
                    log::info!(
                        "[逆变器] {} 光伏={}W 电池={}W 电网={}W SOC={}%",
                        inverter.serial_number.as_deref().unwrap_or("?"),
                        fmt_opt(inverter.p_pv),
                        fmt_opt(inverter.p_battery),
                        fmt_opt(inverter.p_grid_out),
                        fmt_opt(inverter.battery_percent),
                    );
                }
                None => log::warn!("[逆变器] 本拍尚无数据"),
            }
            for battery in plant.batteries() {
                log::info!(
                    "[电池] {} SOC={}% 最高温度={}°C",
                    battery.battery_serial_number.as_deref().unwrap_or("?"),
                    fmt_opt(battery.soc),
                    fmt_opt(battery.temp_max),
                );
            }
        })
        .await
        .context("监视循环退出")?;
    Ok(())
}

fn fmt_opt<T: std::fmt::Display>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "?".to_string())
}
