// 回环集成测试：本地起一个 TCP 服务扮演数据适配器，验证会话客户端的
// 心跳应答、请求响应配对、超时重试与写节奏。
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use givenergy_modbus::services::framer::Framer;
use givenergy_modbus::services::pdu::{
    HeartbeatRequest, Pdu, TransparentRequest, TransparentRequestKind, TransparentResponseKind,
    PADDING_ERROR,
};
use givenergy_modbus::{Error, ModbusClient, ModbusClientConfig, Register};

/// 测试用快节奏配置；刷新周期拉长到不会出现第二拍
fn test_config(port: u16) -> ModbusClientConfig {
    ModbusClientConfig {
        host: "127.0.0.1".to_string(),
        port,
        number_batteries: 0,
        connect_timeout_secs: 1.0,
        connect_backoff_initial_secs: 0.1,
        connect_backoff_multiplier: 1.2,
        connect_backoff_ceiling_secs: 1.0,
        refresh_period_secs: 3600.0,
        full_refresh_interval: 12,
        pacing_interval_secs: 0.01,
        message_ttl_secs: 10.0,
        sweep_interval_secs: 0.05,
        request_timeout_secs: 0.3,
        read_retries: 0,
        write_retries: 2,
    }
}

/// 按厂商口径读出一个完整帧：length 含 uid 与 fid，总帧长 = 6 + length
async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut head = [0u8; 8];
    stream.read_exact(&mut head).await.expect("读帧头");
    let length = u16::from_be_bytes([head[4], head[5]]) as usize;
    let mut rest = vec![0u8; length - 2];
    stream.read_exact(&mut rest).await.expect("读帧体");
    [head.to_vec(), rest].concat()
}

async fn bind_server() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("绑定回环端口");
    let port = listener.local_addr().expect("取端口").port();
    (listener, port)
}

#[tokio::test]
async fn heartbeat_is_mirrored_back() {
    let (listener, port) = bind_server().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        // 设备侧主动发活性探测
        let request = HeartbeatRequest {
            data_adapter_serial_number: "WF1234G567".to_string(),
            data_adapter_type: 1,
        };
        let frame = Framer::build_packet(&Pdu::HeartbeatResponse(request.expected_response()))
            .expect("构造心跳帧");
        stream.write_all(&frame).await.expect("发心跳");
        // 客户端可能先发出刷新读请求；只认心跳应答
        loop {
            let reply = read_frame(&mut stream).await;
            if let Ok(Pdu::HeartbeatResponse(hb)) = Pdu::decode_outgoing(&reply) {
                assert_eq!(hb.data_adapter_serial_number, "WF1234G567");
                assert_eq!(hb.data_adapter_type, 1);
                assert_eq!(reply, frame, "心跳应答须与请求帧逐字节一致");
                return;
            }
        }
    });

    let mut client = ModbusClient::new(test_config(port));
    client.connect().await.expect("连接");
    timeout(Duration::from_secs(5), server)
        .await
        .expect("心跳应答超时")
        .expect("服务端断言失败");
    client.close().await;
}

#[tokio::test]
async fn execute_matches_response_and_updates_plant() {
    let (listener, port) = bind_server().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        loop {
            let frame = read_frame(&mut stream).await;
            let Ok(Pdu::TransparentRequest(request)) = Pdu::decode_outgoing(&frame) else {
                continue;
            };
            // 只应答测试发起的 IR[0..6) 读请求，刷新轮询任其超时
            if let TransparentRequestKind::ReadInputRegisters {
                base_register: 0,
                register_count: 6,
            } = request.kind
            {
                let mut response = request.expected_response();
                response.data_adapter_serial_number = "WF1234G567".to_string();
                response.inverter_serial_number = "SA1234G567".to_string();
                response.kind = TransparentResponseKind::ReadInputRegisters {
                    base_register: 0,
                    register_count: 6,
                    register_values: vec![1, 3054, 3029, 3881, 0, 2389],
                };
                let packet = Framer::build_packet(&Pdu::TransparentResponse(response))
                    .expect("构造响应帧");
                stream.write_all(&packet).await.expect("发响应");
                return stream;
            }
        }
    });

    let mut client = ModbusClient::new(test_config(port));
    client.connect().await.expect("连接");
    let request = TransparentRequest::read_input_registers(0, 6, 0x32);
    let results = client
        .execute(vec![request], Duration::from_secs(2), 0, false)
        .await
        .expect("execute");
    assert_eq!(results.len(), 1);
    let response = results[0].as_ref().expect("应得响应");
    assert_eq!(response.slave_address, 0x32);
    assert_eq!(response.inverter_serial_number, "SA1234G567");

    // 响应随后驱动电站模型（future 先于模型更新完成，稍等片刻）
    tokio::time::sleep(Duration::from_millis(100)).await;
    let plant = client.plant().await;
    let cache = plant.register_cache(0x32).expect("缓存已建立");
    assert_eq!(cache.get(Register::Input(1)), Some(3054));
    assert_eq!(cache.to_f64(Register::Input(5)), Some(238.9));

    server.await.expect("服务端断言失败");
    client.close().await;
}

#[tokio::test]
async fn error_response_is_never_surfaced_as_success() {
    let (listener, port) = bind_server().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        loop {
            let frame = read_frame(&mut stream).await;
            let Ok(Pdu::TransparentRequest(request)) = Pdu::decode_outgoing(&frame) else {
                continue;
            };
            // 对测试请求一律回错误响应（功能码最高位置位、不携带值）
            if let TransparentRequestKind::ReadInputRegisters {
                base_register: 0,
                register_count: 6,
            } = request.kind
            {
                let mut response = request.expected_response();
                response.error = true;
                response.padding = PADDING_ERROR;
                response.data_adapter_serial_number = "WF1234G567".to_string();
                response.inverter_serial_number = "SA1234G567".to_string();
                let packet = Framer::build_packet(&Pdu::TransparentResponse(response))
                    .expect("构造错误响应帧");
                stream.write_all(&packet).await.expect("发错误响应");
                return stream;
            }
        }
    });

    let mut client = ModbusClient::new(test_config(port));
    client.connect().await.expect("连接");
    let request = TransparentRequest::read_input_registers(0, 6, 0x32);
    let results = client
        .execute(vec![request], Duration::from_secs(2), 0, true)
        .await
        .expect("execute");
    // 重试预算为零：错误响应不得作为成功值交付，按超时判死
    assert!(
        matches!(results[0], Err(Error::Timeout)),
        "错误响应不应以 Ok 形式出现: {:?}",
        results[0]
    );
    let _ = server.await;
    client.close().await;
}

#[tokio::test]
async fn timeout_retries_then_gives_up() {
    let (listener, port) = bind_server().await;
    // 黑洞服务端：收下一切请求但从不应答，数够三次写请求即返回
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut write_frames = 0u32;
        while write_frames < 3 {
            let frame = read_frame(&mut stream).await;
            if let Ok(Pdu::TransparentRequest(request)) = Pdu::decode_outgoing(&frame) {
                if matches!(request.kind, TransparentRequestKind::WriteHoldingRegister { .. }) {
                    write_frames += 1;
                }
            }
        }
        write_frames
    });

    let mut client = ModbusClient::new(test_config(port));
    client.connect().await.expect("连接");
    let request = TransparentRequest::write_holding_register(20, 1);
    let started = Instant::now();
    let results = client
        .execute(vec![request], Duration::from_millis(300), 2, true)
        .await
        .expect("execute");
    assert!(
        matches!(results[0], Err(Error::Timeout)),
        "重试耗尽后应判超时: {:?}",
        results[0]
    );
    // 三次发送各间隔一个超时周期
    assert!(started.elapsed() >= Duration::from_millis(600));

    let transmissions = timeout(Duration::from_secs(5), server)
        .await
        .expect("服务端超时")
        .expect("服务端失败");
    assert_eq!(transmissions, 3, "应恰好发送 1 + 2 次重试");

    // 等 sweeper 清理完刷新轮询的残余期望
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(client.outstanding_requests().await, 0);
    client.close().await;
}

#[tokio::test]
async fn writes_are_paced() {
    let (listener, port) = bind_server().await;
    let pacing = Duration::from_millis(150);
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        // 首个刷新节拍为整刷：6 个读请求连续入队，写出却必须按节拍分开
        let mut arrivals = Vec::new();
        for _ in 0..6 {
            let _ = read_frame(&mut stream).await;
            arrivals.push(Instant::now());
        }
        arrivals
    });

    let mut config = test_config(port);
    config.pacing_interval_secs = 0.15;
    let mut client = ModbusClient::new(config);
    client.connect().await.expect("连接");

    let arrivals = timeout(Duration::from_secs(10), server)
        .await
        .expect("服务端超时")
        .expect("服务端失败");
    for pair in arrivals.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        // 留出调度抖动余量
        assert!(
            gap >= pacing.mul_f64(0.8),
            "相邻两次写出间隔 {gap:?} 小于节拍 {pacing:?}"
        );
    }
    client.close().await;
}

#[tokio::test]
async fn same_shape_request_replaces_older_one() {
    let (listener, port) = bind_server().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        // 不应答，只消费
        loop {
            if timeout(Duration::from_secs(3), read_frame(&mut stream))
                .await
                .is_err()
            {
                return;
            }
        }
    });

    let mut config = test_config(port);
    config.request_timeout_secs = 2.0;
    let mut client = ModbusClient::new(config);
    client.connect().await.expect("连接");

    let first = TransparentRequest::read_input_registers(0, 6, 0x32);
    let second = first.clone();
    let client_ref = &client;
    let (first_result, second_result) = tokio::join!(
        client_ref.execute(vec![first], Duration::from_secs(2), 0, true),
        async {
            // 稍后提交同形请求，应取代前者
            tokio::time::sleep(Duration::from_millis(100)).await;
            client_ref
                .execute(vec![second], Duration::from_millis(300), 0, true)
                .await
        }
    );
    let first_result = first_result.expect("execute");
    assert!(
        matches!(first_result[0], Err(Error::Cancelled(_))),
        "旧请求应被同形新请求取消: {:?}",
        first_result[0]
    );
    // 新请求自身因无应答而超时
    assert!(matches!(second_result.expect("execute")[0], Err(Error::Timeout)));

    server.abort();
    client.close().await;
}

#[tokio::test]
async fn disconnect_triggers_reconnect_with_backoff() {
    let (listener, port) = bind_server().await;
    let server = tokio::spawn(async move {
        // 第一条连接立即断开，逼客户端走重连路径
        let (stream, _) = listener.accept().await.expect("accept #1");
        drop(stream);
        let (mut stream, _) = listener.accept().await.expect("accept #2");
        // 第二条连接上能收到刷新请求即算恢复
        let frame = read_frame(&mut stream).await;
        assert!(Pdu::decode_outgoing(&frame).is_ok());
    });

    let mut client = ModbusClient::new(test_config(port));
    let watch = tokio::spawn(async move {
        let _ = client.watch_plant(|_| {}).await;
    });

    timeout(Duration::from_secs(10), server)
        .await
        .expect("重连超时")
        .expect("服务端断言失败");
    watch.abort();
}
