// Modbus TCP 会话客户端：单连接全双工，五个协作任务在一条有序字节流上
// 复用多路并发请求。响应按 shape hash 配回请求；写节奏由 writer 任务统一节流。
//
// 任务分工（均为协作式，仅在挂起点让出）：
//   reader     读套接字喂给成帧器，解出的 PDU 压入 rx 队列
//   writer     逐条取出站报文，过期丢弃，写出后按节拍休眠
//   dispatcher 心跳自动应答、完成期望响应、驱动电站模型更新
//   sweeper    扫描期望表，超时重试或判死
//   refresher  周期产出刷新请求集，每 N 拍做一次整刷
use std::collections::{HashMap, VecDeque};
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};

use crate::commands;
use crate::domain::plant::Plant;
use crate::error::{Error, Result};
use crate::services::framer::Framer;
use crate::services::pdu::{Pdu, TransparentRequest, TransparentRequestKind, TransparentResponse, TransparentResponseKind};

/// 客户端配置；时间量一律以秒计，便于序列化
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusClientConfig {
    pub host: String,
    /// 厂商适配器监听 8899 而非标准 Modbus 的 502
    pub port: u16,
    /// 接入的电池数量；由外部配置，不做自动发现
    pub number_batteries: usize,
    pub connect_timeout_secs: f64,
    pub connect_backoff_initial_secs: f64,
    pub connect_backoff_multiplier: f64,
    pub connect_backoff_ceiling_secs: f64,
    pub refresh_period_secs: f64,
    /// 每多少个刷新节拍做一次整刷（追加保持段）
    pub full_refresh_interval: u64,
    /// 两次写出之间的最小间隔
    pub pacing_interval_secs: f64,
    /// 出站报文基础存活时间；入队时按队列深度 × 节拍再加宽
    pub message_ttl_secs: f64,
    pub sweep_interval_secs: f64,
    pub request_timeout_secs: f64,
    pub read_retries: u32,
    pub write_retries: u32,
}

impl Default for ModbusClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8899,
            number_batteries: 0,
            connect_timeout_secs: 2.0,
            connect_backoff_initial_secs: 1.0,
            connect_backoff_multiplier: 1.2,
            connect_backoff_ceiling_secs: 60.0,
            refresh_period_secs: 5.0,
            full_refresh_interval: 12,
            pacing_interval_secs: 0.35,
            message_ttl_secs: 10.0,
            sweep_interval_secs: 0.2,
            request_timeout_secs: 1.0,
            read_retries: 0,
            write_retries: 2,
        }
    }
}

impl ModbusClientConfig {
    fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout_secs)
    }
    fn refresh_period(&self) -> Duration {
        Duration::from_secs_f64(self.refresh_period_secs)
    }
    fn pacing_interval(&self) -> Duration {
        Duration::from_secs_f64(self.pacing_interval_secs)
    }
    fn message_ttl(&self) -> Duration {
        Duration::from_secs_f64(self.message_ttl_secs)
    }
    fn sweep_interval(&self) -> Duration {
        Duration::from_secs_f64(self.sweep_interval_secs)
    }
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_secs)
    }
}

/// 出站队列条目
struct OutboundMessage {
    pdu: Pdu,
    /// 透传请求对应的期望响应 shape；心跳应答无期望
    shape: Option<u64>,
    created: Instant,
    ttl: Duration,
}

/// 入站队列条目，带解码时间戳
struct RxMessage {
    pdu: Pdu,
    raw: Vec<u8>,
    received: Instant,
}

/// 期望表条目：请求发出后登记，由 dispatcher 完成或 sweeper 判死
struct ExpectedResponse {
    /// 重试时原样重新入队
    request: TransparentRequest,
    /// 完成调用方 future；刷新轮询不带消费者
    notify: Option<oneshot::Sender<Result<TransparentResponse>>>,
    timeout: Duration,
    retries_remaining: u32,
    created: Instant,
    /// writer 实际写出的时刻；超时从这里起算
    transmitted: Option<Instant>,
}

type ExpectedMap = Arc<Mutex<HashMap<u64, ExpectedResponse>>>;

const TX_QUEUE_CAPACITY: usize = 100;
const RX_QUEUE_CAPACITY: usize = 100;
const READ_CHUNK: usize = 300;

const DEBUG_ALL_CAP: usize = 1000;
const DEBUG_ERROR_CAP: usize = 1000;
const DEBUG_SUSPICIOUS_CAP: usize = 100;
const DEBUG_REJECTED_CAP: usize = 100;

/// 原始帧归档：all 全量、error 解码失败、suspicious 已知特例、rejected 被电站拒绝
#[derive(Debug, Default)]
pub struct DebugFrames {
    all: VecDeque<Vec<u8>>,
    error: VecDeque<Vec<u8>>,
    suspicious: VecDeque<Vec<u8>>,
    rejected: VecDeque<Vec<u8>>,
}

impl DebugFrames {
    fn push(queue: &mut VecDeque<Vec<u8>>, cap: usize, frame: Vec<u8>) {
        if queue.len() >= cap {
            queue.pop_front();
        }
        queue.push_back(frame);
    }

    fn push_all(&mut self, frame: Vec<u8>) {
        Self::push(&mut self.all, DEBUG_ALL_CAP, frame);
    }
    fn push_error(&mut self, frame: Vec<u8>) {
        Self::push(&mut self.error, DEBUG_ERROR_CAP, frame);
    }
    fn push_suspicious(&mut self, frame: Vec<u8>) {
        Self::push(&mut self.suspicious, DEBUG_SUSPICIOUS_CAP, frame);
    }
    fn push_rejected(&mut self, frame: Vec<u8>) {
        Self::push(&mut self.rejected, DEBUG_REJECTED_CAP, frame);
    }

    pub fn suspicious_count(&self) -> usize {
        self.suspicious.len()
    }
    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }

    /// 追加写入调试目录：每批前置一行 Unix 时间戳注释，逐帧一行十六进制
    pub fn dump_to_files(&mut self, dir: &Path) -> std::io::Result<()> {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        for (name, queue) in [
            ("all", &mut self.all),
            ("error", &mut self.error),
            ("suspicious", &mut self.suspicious),
            ("rejected", &mut self.rejected),
        ] {
            if queue.is_empty() {
                continue;
            }
            std::fs::create_dir_all(dir)?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(format!("{name}_frames.txt")))?;
            writeln!(file, "# {ts}")?;
            while let Some(frame) = queue.pop_front() {
                let hex: String = frame.iter().map(|b| format!("{b:02x}")).collect();
                writeln!(file, "{hex}")?;
            }
        }
        Ok(())
    }
}

pub struct ModbusClient {
    config: ModbusClientConfig,
    plant: Arc<Mutex<Plant>>,
    expected: ExpectedMap,
    debug_frames: Arc<Mutex<DebugFrames>>,
    tx_sender: Arc<Mutex<Option<mpsc::Sender<OutboundMessage>>>>,
    disconnected: Arc<Notify>,
    connected: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ModbusClient {
    pub fn new(config: ModbusClientConfig) -> Self {
        let plant = Plant::new(config.number_batteries);
        Self {
            config,
            plant: Arc::new(Mutex::new(plant)),
            expected: Arc::new(Mutex::new(HashMap::new())),
            debug_frames: Arc::new(Mutex::new(DebugFrames::default())),
            tx_sender: Arc::new(Mutex::new(None)),
            disconnected: Arc::new(Notify::new()),
            connected: Arc::new(AtomicBool::new(false)),
            tasks: Vec::new(),
        }
    }

    pub fn config(&self) -> &ModbusClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// 电站模型快照
    pub async fn plant(&self) -> Plant {
        self.plant.lock().await.clone()
    }

    /// 期望表中未决请求数；正常运行时应随响应到达而归零
    pub async fn outstanding_requests(&self) -> usize {
        self.expected.lock().await.len()
    }

    pub async fn dump_debug_frames(&self, dir: &Path) -> std::io::Result<()> {
        self.debug_frames.lock().await.dump_to_files(dir)
    }

    /// 建立连接并启动后台任务；连接失败按退避曲线无限重试
    pub async fn connect(&mut self) -> Result<()> {
        self.reset_session("client restarting").await;
        let stream = self.connect_with_backoff().await;
        let tx_sender = self.spawn_tasks(stream);
        *self.tx_sender.lock().await = Some(tx_sender);
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// 关闭连接并取消所有未决请求
    pub async fn close(&mut self) {
        self.reset_session("客户端关闭").await;
    }

    async fn connect_with_backoff(&self) -> TcpStream {
        let mut backoff = Duration::from_secs_f64(self.config.connect_backoff_initial_secs);
        let ceiling = Duration::from_secs_f64(self.config.connect_backoff_ceiling_secs);
        let mut retries = 0u32;
        loop {
            let attempt = timeout(
                self.config.connect_timeout(),
                TcpStream::connect((self.config.host.as_str(), self.config.port)),
            )
            .await;
            let reason = match attempt {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("设置 TCP_NODELAY 失败: {e}");
                    }
                    if retries > 0 {
                        info!(
                            "已连接 {}:{}（经 {retries} 次重试）",
                            self.config.host, self.config.port
                        );
                    } else {
                        info!("已连接 {}:{}", self.config.host, self.config.port);
                    }
                    return stream;
                }
                Ok(Err(e)) => format!("连接 {}:{} 失败: {e}", self.config.host, self.config.port),
                Err(_) => format!(
                    "连接 {}:{} 在 {:.1}s 内未建立",
                    self.config.host, self.config.port, self.config.connect_timeout_secs
                ),
            };
            retries += 1;
            error!("{reason}；{:.1}s 后第 {retries} 次重试", backoff.as_secs_f64());
            sleep(backoff).await;
            backoff = ceiling.min(backoff.mul_f64(self.config.connect_backoff_multiplier));
        }
    }

    fn spawn_tasks(&mut self, stream: TcpStream) -> mpsc::Sender<OutboundMessage> {
        let (read_half, write_half) = stream.into_split();
        let (tx_s, tx_r) = mpsc::channel::<OutboundMessage>(TX_QUEUE_CAPACITY);
        let (rx_s, rx_r) = mpsc::channel::<RxMessage>(RX_QUEUE_CAPACITY);

        self.tasks.push(tokio::spawn(reader_task(
            read_half,
            rx_s,
            self.debug_frames.clone(),
            self.disconnected.clone(),
        )));
        self.tasks.push(tokio::spawn(writer_task(
            tx_r,
            write_half,
            self.expected.clone(),
            self.config.pacing_interval(),
            self.disconnected.clone(),
        )));
        self.tasks.push(tokio::spawn(dispatcher_task(
            rx_r,
            self.expected.clone(),
            self.plant.clone(),
            self.debug_frames.clone(),
            tx_s.clone(),
            self.config.clone(),
        )));
        self.tasks.push(tokio::spawn(sweeper_task(
            self.expected.clone(),
            tx_s.clone(),
            self.config.clone(),
        )));
        self.tasks.push(tokio::spawn(refresher_task(
            self.expected.clone(),
            tx_s.clone(),
            self.config.clone(),
        )));

        tx_s
    }

    /// 断开清场：终止任务、取消全部未决请求、丢弃队列
    async fn reset_session(&mut self, cancel_reason: &str) {
        self.connected.store(false, Ordering::Relaxed);
        for task in self.tasks.drain(..) {
            task.abort();
        }
        *self.tx_sender.lock().await = None;
        let mut map = self.expected.lock().await;
        if !map.is_empty() {
            warn!("取消 {} 个未决请求: {cancel_reason}", map.len());
        }
        for (_, entry) in map.drain() {
            if let Some(tx) = entry.notify {
                let _ = tx.send(Err(Error::Cancelled(cancel_reason.to_string())));
            }
        }
    }

    /// 批量下发请求并按原顺序收集响应。
    /// 整批请求无条件全部入队；return_exceptions 只决定收集结果时
    /// 逐项返回错误还是首个失败即整体返回。
    pub async fn execute(
        &self,
        requests: Vec<TransparentRequest>,
        request_timeout: Duration,
        retries: u32,
        return_exceptions: bool,
    ) -> Result<Vec<Result<TransparentResponse>>> {
        let mut receivers = Vec::with_capacity(requests.len());
        for request in requests {
            receivers.push(self.submit_request(request, request_timeout, retries).await);
        }
        let mut results = Vec::with_capacity(receivers.len());
        for receiver in receivers {
            let result = match receiver {
                Ok(rx) => rx
                    .await
                    .unwrap_or_else(|_| Err(Error::Cancelled("client restarting".to_string()))),
                Err(e) => Err(e),
            };
            match result {
                Err(e) if !return_exceptions => return Err(e),
                other => results.push(other),
            }
        }
        Ok(results)
    }

    /// 单组命令快捷入口，采用写请求的默认超时与重试
    pub async fn one_shot_command(
        &self,
        requests: Vec<TransparentRequest>,
    ) -> Result<Vec<TransparentResponse>> {
        self.execute(
            requests,
            self.config.request_timeout(),
            self.config.write_retries,
            false,
        )
        .await?
        .into_iter()
        .collect()
    }

    /// 主动刷新一轮电站数据并返回快照
    pub async fn refresh_plant(&self, full_refresh: bool) -> Result<Plant> {
        let requests = commands::refresh::refresh_plant_data(full_refresh, self.config.number_batteries);
        self.execute(
            requests,
            self.config.request_timeout(),
            self.config.read_retries,
            true,
        )
        .await?;
        Ok(self.plant().await)
    }

    /// 常驻监视：连接、跑满任务集，每个刷新节拍后回调电站快照；
    /// 断开则取消未决请求并自动重连
    pub async fn watch_plant<F>(&mut self, mut handler: F) -> Result<()>
    where
        F: FnMut(&Plant),
    {
        loop {
            self.connect().await?;
            let mut tick = interval(self.config.refresh_period());
            tick.tick().await; // 跳过立即触发的首拍
            loop {
                tokio::select! {
                    _ = self.disconnected.notified() => break,
                    _ = tick.tick() => {
                        let plant = self.plant.lock().await;
                        handler(&plant);
                    }
                }
            }
            warn!("连接断开，重置会话后重连");
            self.reset_session("client restarting").await;
        }
    }

    /// 登记期望响应并把请求送入发送队列；同形的在途请求被取消替换
    async fn submit_request(
        &self,
        request: TransparentRequest,
        request_timeout: Duration,
        retries: u32,
    ) -> Result<oneshot::Receiver<Result<TransparentResponse>>> {
        request.ensure_valid_state()?;
        let sender = self
            .tx_sender
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::Communication("尚未连接".to_string()))?;
        let (notify_tx, notify_rx) = oneshot::channel();
        let shape = register_expectation(
            &self.expected,
            &request,
            request_timeout,
            retries,
            Some(notify_tx),
        )
        .await;
        enqueue_message(
            &sender,
            self.config.pacing_interval(),
            self.config.message_ttl(),
            Pdu::TransparentRequest(request),
            Some(shape),
        )
        .await?;
        Ok(notify_rx)
    }
}

// ------------------------------------------------------------------------------------------------

/// 登记期望响应；同形旧条目被取消替换（旧轮询数据不会比下一轮更有用）
async fn register_expectation(
    expected: &ExpectedMap,
    request: &TransparentRequest,
    request_timeout: Duration,
    retries: u32,
    notify: Option<oneshot::Sender<Result<TransparentResponse>>>,
) -> u64 {
    let shape = Pdu::TransparentResponse(request.expected_response()).shape_hash();
    let mut map = expected.lock().await;
    if let Some(old) = map.remove(&shape) {
        debug!("同形请求在途，取消并替换: {:?}", old.request.kind);
        if let Some(tx) = old.notify {
            let _ = tx.send(Err(Error::Cancelled("被同形的新请求替换".to_string())));
        }
    }
    map.insert(
        shape,
        ExpectedResponse {
            request: request.clone(),
            notify,
            timeout: request_timeout,
            retries_remaining: retries,
            created: Instant::now(),
            transmitted: None,
        },
    );
    shape
}

/// 入队出站报文；TTL 按当前队列深度 × 节拍加宽，保证确定性丢弃而非无界堆积
async fn enqueue_message(
    sender: &mpsc::Sender<OutboundMessage>,
    pacing: Duration,
    base_ttl: Duration,
    pdu: Pdu,
    shape: Option<u64>,
) -> Result<()> {
    let depth = (sender.max_capacity() - sender.capacity()) as u32;
    let ttl = base_ttl + pacing * depth;
    sender
        .send(OutboundMessage {
            pdu,
            shape,
            created: Instant::now(),
            ttl,
        })
        .await
        .map_err(|_| Error::Communication("发送队列已关闭".to_string()))
}

async fn reader_task(
    mut reader: OwnedReadHalf,
    rx_sender: mpsc::Sender<RxMessage>,
    debug_frames: Arc<Mutex<DebugFrames>>,
    disconnected: Arc<Notify>,
) {
    let mut framer = Framer::new();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                warn!("对端关闭连接");
                disconnected.notify_one();
                return;
            }
            Ok(n) => {
                for (result, raw) in framer.process_incoming_data(&buf[..n]) {
                    let mut frames = debug_frames.lock().await;
                    frames.push_all(raw.clone());
                    match result {
                        Ok(pdu) => {
                            drop(frames);
                            if rx_sender
                                .send(RxMessage {
                                    pdu,
                                    raw,
                                    received: Instant::now(),
                                })
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                        Err(e) if e.is_quirk() => {
                            debug!("归档可疑帧: {e}");
                            frames.push_suspicious(raw);
                        }
                        Err(e) => {
                            warn!("解码失败: {e}");
                            frames.push_error(raw);
                        }
                    }
                }
            }
            Err(e) => {
                error!("读套接字失败: {e}");
                disconnected.notify_one();
                return;
            }
        }
    }
}

async fn writer_task(
    mut tx_receiver: mpsc::Receiver<OutboundMessage>,
    mut writer: OwnedWriteHalf,
    expected: ExpectedMap,
    pacing: Duration,
    disconnected: Arc<Notify>,
) {
    while let Some(item) = tx_receiver.recv().await {
        if item.created.elapsed() > item.ttl {
            warn!(
                "出站报文在队列中滞留 {:.1}s 超过 TTL，丢弃",
                item.created.elapsed().as_secs_f64()
            );
            if let Some(shape) = item.shape {
                if let Some(entry) = expected.lock().await.remove(&shape) {
                    if let Some(tx) = entry.notify {
                        let _ = tx.send(Err(Error::Cancelled("在发送队列中过期".to_string())));
                    }
                }
            }
            continue;
        }
        let packet = match Framer::build_packet(&item.pdu) {
            Ok(packet) => packet,
            Err(e) => {
                error!("构帧失败: {e}");
                continue;
            }
        };
        if let Some(shape) = item.shape {
            if let Some(entry) = expected.lock().await.get_mut(&shape) {
                entry.transmitted = Some(Instant::now());
            }
        }
        debug!("发送 {} 字节", packet.len());
        if let Err(e) = writer.write_all(&packet).await {
            error!("写套接字失败: {e}");
            disconnected.notify_one();
            return;
        }
        if let Err(e) = writer.flush().await {
            error!("刷新套接字失败: {e}");
            disconnected.notify_one();
            return;
        }
        // 节流：即便多个请求并发提交，写出也按节拍串行
        sleep(pacing).await;
    }
}

async fn dispatcher_task(
    mut rx_receiver: mpsc::Receiver<RxMessage>,
    expected: ExpectedMap,
    plant: Arc<Mutex<Plant>>,
    debug_frames: Arc<Mutex<DebugFrames>>,
    tx_sender: mpsc::Sender<OutboundMessage>,
    config: ModbusClientConfig,
) {
    while let Some(message) = rx_receiver.recv().await {
        match message.pdu {
            Pdu::HeartbeatRequest(request) => {
                debug!(
                    "心跳请求（适配器 {}），回发镜像应答",
                    request.data_adapter_serial_number
                );
                let reply = Pdu::HeartbeatResponse(request.expected_response());
                if enqueue_message(
                    &tx_sender,
                    config.pacing_interval(),
                    config.message_ttl(),
                    reply,
                    None,
                )
                .await
                .is_err()
                {
                    return;
                }
            }
            Pdu::TransparentResponse(response) => {
                handle_response(
                    response,
                    &message.raw,
                    message.received,
                    &expected,
                    &plant,
                    &debug_frames,
                    &tx_sender,
                    &config,
                )
                .await;
            }
            other => {
                warn!("客户端不应收到该类型报文: {other:?}");
            }
        }
    }
}

async fn handle_response(
    response: TransparentResponse,
    raw: &[u8],
    received: Instant,
    expected: &ExpectedMap,
    plant: &Arc<Mutex<Plant>>,
    debug_frames: &Arc<Mutex<DebugFrames>>,
    tx_sender: &mpsc::Sender<OutboundMessage>,
    config: &ModbusClientConfig,
) {
    let shape = Pdu::TransparentResponse(response.clone()).shape_hash();
    // 先在期望表里配对；锁内只做状态迁移，重发动作出锁后执行
    let mut retry_request: Option<TransparentRequest> = None;
    {
        let mut map = expected.lock().await;
        if let Some(entry) = map.remove(&shape) {
            if let Some(transmitted) = entry.transmitted {
                let roundtrip = received.duration_since(transmitted);
                let is_read = matches!(
                    response.kind,
                    TransparentResponseKind::ReadHoldingRegisters { .. }
                        | TransparentResponseKind::ReadInputRegisters { .. }
                );
                if roundtrip > Duration::from_secs(1) && !is_read {
                    warn!("响应往返耗时 {:.2}s", roundtrip.as_secs_f64());
                } else {
                    debug!("响应往返耗时 {:.0}ms", roundtrip.as_secs_f64() * 1000.0);
                }
            }
            if response.error {
                // 错误响应只会引发重试，绝不作为成功值交给调用方
                if entry.retries_remaining > 0 {
                    warn!(
                        "错误响应，重试（剩余 {} 次）: {:?}",
                        entry.retries_remaining - 1,
                        entry.request.kind
                    );
                    retry_request = Some(entry.request.clone());
                    map.insert(
                        shape,
                        ExpectedResponse {
                            retries_remaining: entry.retries_remaining - 1,
                            created: Instant::now(),
                            transmitted: None,
                            ..entry
                        },
                    );
                } else {
                    warn!("错误响应且重试预算耗尽，判死: {:?}", entry.request.kind);
                    if let Some(tx) = entry.notify {
                        let _ = tx.send(Err(Error::Timeout));
                    }
                }
            } else {
                // 写响应回读与请求值不一致时提醒消费方复核
                if let (
                    TransparentRequestKind::WriteHoldingRegister { register, value },
                    TransparentResponseKind::WriteHoldingRegister {
                        register: echo_register,
                        value: echo_value,
                    },
                ) = (&entry.request.kind, &response.kind)
                {
                    if register != echo_register || value != echo_value {
                        warn!(
                            "写 HR:{register}={value} 的回读为 HR:{echo_register}={echo_value}，设备可能拒绝了该值"
                        );
                    }
                }
                if let Some(tx) = entry.notify {
                    let _ = tx.send(Ok(response.clone()));
                }
            }
        } else {
            debug!("非期望中的响应: shape={shape:x}");
        }
    }
    if let Some(request) = retry_request {
        let _ = enqueue_message(
            tx_sender,
            config.pacing_interval(),
            config.message_ttl(),
            Pdu::TransparentRequest(request),
            Some(shape),
        )
        .await;
        return;
    }
    // 电站更新；被拒绝的帧归档后继续
    if let Err(e) = plant.lock().await.update(&response) {
        warn!("响应被电站拒绝: {e}");
        debug_frames.lock().await.push_rejected(raw.to_vec());
    }
}

/// 期望表扫描：超时重试或判死；调用方已放弃的条目顺带清理
async fn sweeper_task(
    expected: ExpectedMap,
    tx_sender: mpsc::Sender<OutboundMessage>,
    config: ModbusClientConfig,
) {
    let mut tick = interval(config.sweep_interval());
    loop {
        tick.tick().await;
        let mut retries: Vec<(u64, TransparentRequest)> = Vec::new();
        {
            let mut map = expected.lock().await;
            let now = Instant::now();
            let expired: Vec<u64> = map
                .iter()
                .filter(|(_, entry)| {
                    let abandoned = entry
                        .notify
                        .as_ref()
                        .map(|tx| tx.is_closed())
                        .unwrap_or(false);
                    let deadline_base = entry.transmitted.unwrap_or(entry.created);
                    abandoned || now.duration_since(deadline_base) > entry.timeout
                })
                .map(|(shape, _)| *shape)
                .collect();
            for shape in expired {
                let Some(mut entry) = map.remove(&shape) else { continue };
                if entry.notify.as_ref().map(|tx| tx.is_closed()).unwrap_or(false) {
                    debug!("调用方已放弃，清理期望条目: {:?}", entry.request.kind);
                    continue;
                }
                if entry.retries_remaining > 0 {
                    warn!(
                        "响应超时，重试（剩余 {} 次）: {:?}",
                        entry.retries_remaining - 1,
                        entry.request.kind
                    );
                    entry.retries_remaining -= 1;
                    entry.created = Instant::now();
                    entry.transmitted = None;
                    retries.push((shape, entry.request.clone()));
                    map.insert(shape, entry);
                } else {
                    debug!("重试预算耗尽，判死: {:?}", entry.request.kind);
                    if let Some(tx) = entry.notify {
                        let _ = tx.send(Err(Error::Timeout));
                    }
                }
            }
        }
        for (shape, request) in retries {
            let _ = enqueue_message(
                &tx_sender,
                config.pacing_interval(),
                config.message_ttl(),
                Pdu::TransparentRequest(request),
                Some(shape),
            )
            .await;
        }
    }
}

/// 周期产出刷新请求集；刷新轮询不挂消费者，由电站更新兑现价值
async fn refresher_task(
    expected: ExpectedMap,
    tx_sender: mpsc::Sender<OutboundMessage>,
    config: ModbusClientConfig,
) {
    let mut refresh_count: u64 = 0;
    let mut tick = interval(config.refresh_period());
    loop {
        tick.tick().await;
        let full_refresh = refresh_count % config.full_refresh_interval == 0;
        debug!(
            "刷新 #{refresh_count}（整刷={full_refresh}，电池 {} 块）",
            config.number_batteries
        );
        for request in commands::refresh::refresh_plant_data(full_refresh, config.number_batteries) {
            let shape = register_expectation(
                &expected,
                &request,
                config.request_timeout(),
                config.read_retries,
                None,
            )
            .await;
            if enqueue_message(
                &tx_sender,
                config.pacing_interval(),
                config.message_ttl(),
                Pdu::TransparentRequest(request),
                Some(shape),
            )
            .await
            .is_err()
            {
                return;
            }
        }
        refresh_count += 1;
        if refresh_count % 100 == 0 {
            info!("已完成 {refresh_count} 轮刷新");
        }
    }
}
