//! Test Support
//!
//! 스크립트로 응답하는 Bolt 스텁 서버

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::bolt::message::tag;
use crate::bolt::packstream::{pack, unpack};
use crate::bolt::{BoltVersion, ChunkCodec, Structure, Value};
use crate::driver::address::ServerAddress;
use crate::driver::auth::AuthToken;
use crate::driver::config::DriverConfig;
use crate::driver::driver::Driver;

// ============================================================================
// 응답 생성 헬퍼
// ============================================================================

pub fn success(entries: &[(&str, Value)]) -> Structure {
    let metadata: HashMap<String, Value> = entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    Structure::new(tag::SUCCESS, vec![Value::Map(metadata)])
}

pub fn record(values: Vec<Value>) -> Structure {
    Structure::new(tag::RECORD, vec![Value::List(values)])
}

pub fn failure(code: &str, message: &str) -> Structure {
    let mut metadata = HashMap::new();
    metadata.insert("code".to_string(), Value::from(code));
    metadata.insert("message".to_string(), Value::from(message));
    Structure::new(tag::FAILURE, vec![Value::Map(metadata)])
}

pub fn ignored() -> Structure {
    Structure::new(tag::IGNORED, vec![])
}

/// `RUST_LOG` 로 테스트 로그를 켠다. 여러 번 불러도 된다.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 스텁 서버에 직접 연결하는 드라이버
pub fn driver_for(server: &StubServer) -> Driver {
    Driver::new(&format!("bolt://{}", server.address()), AuthToken::none()).unwrap()
}

pub fn driver_with(config: DriverConfig) -> Driver {
    Driver::with_config(config).unwrap()
}

// ============================================================================
// StubServer
// ============================================================================

#[derive(Default)]
struct StubState {
    scripts: HashMap<u8, VecDeque<Vec<Structure>>>,
    disconnect_on: HashSet<u8>,
    requests: Vec<Structure>,
    connections: usize,
}

impl StubState {
    fn replies_for(&mut self, request: &Structure) -> Vec<Structure> {
        if let Some(batch) = self.scripts.get_mut(&request.tag).and_then(VecDeque::pop_front) {
            return batch;
        }
        match request.tag {
            tag::HELLO => vec![success(&[
                ("server", Value::from("Neo4j/5.x")),
                ("connection_id", Value::from("bolt-stub")),
            ])],
            _ => vec![success(&[])],
        }
    }
}

/// 요청 태그별로 준비된 응답을 돌려주는 서버. 연결 수에 제한이 없다.
///
/// FAILURE 이후에는 RESET 전까지 모든 요청에 IGNORED 로 답한다.
pub struct StubServer {
    address: ServerAddress,
    state: Arc<Mutex<StubState>>,
    task: JoinHandle<()>,
}

impl StubServer {
    pub async fn start(version: BoltVersion) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(StubState::default()));

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_state.lock().connections += 1;
                tokio::spawn(serve(socket, version, accept_state.clone()));
            }
        });

        Self {
            address: ServerAddress::new("127.0.0.1", port),
            state,
            task,
        }
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// 다음 `request_tag` 요청에 대한 응답. 빈 목록이면 응답하지 않는다.
    pub fn script(&self, request_tag: u8, replies: Vec<Structure>) {
        self.state
            .lock()
            .scripts
            .entry(request_tag)
            .or_default()
            .push_back(replies);
    }

    /// 다음 `request_tag` 요청을 받으면 응답 후 연결을 끊는다.
    pub fn disconnect_on(&self, request_tag: u8) {
        self.state.lock().disconnect_on.insert(request_tag);
    }

    pub fn requests(&self) -> Vec<Structure> {
        self.state.lock().requests.clone()
    }

    pub fn request_tags(&self) -> Vec<u8> {
        self.state.lock().requests.iter().map(|r| r.tag).collect()
    }

    pub fn requests_with(&self, request_tag: u8) -> Vec<Structure> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.tag == request_tag)
            .cloned()
            .collect()
    }

    /// 지금까지 받은 연결 수
    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut socket: TcpStream, version: BoltVersion, state: Arc<Mutex<StubState>>) {
    let mut preamble = [0u8; 20];
    if socket.read_exact(&mut preamble).await.is_err() {
        return;
    }
    if socket.write_all(&[0, 0, version.minor, version.major]).await.is_err() {
        return;
    }

    let mut framed = Framed::new(socket, ChunkCodec::new());
    let mut failed = false;
    while let Some(Ok(message)) = framed.next().await {
        let request = match unpack(&message) {
            Ok(Value::Structure(s)) => s,
            _ => return,
        };
        let request_tag = request.tag;
        if request_tag == tag::GOODBYE {
            state.lock().requests.push(request);
            return;
        }

        let (replies, disconnect) = {
            let mut state = state.lock();
            state.requests.push(request.clone());
            let replies = if failed && request_tag != tag::RESET {
                vec![ignored()]
            } else {
                state.replies_for(&request)
            };
            (replies, state.disconnect_on.remove(&request_tag))
        };

        if request_tag == tag::RESET {
            failed = false;
        }
        for reply in &replies {
            failed |= reply.tag == tag::FAILURE;
            let bytes = pack(&Value::Structure(reply.clone())).unwrap();
            if framed.feed(&bytes[..]).await.is_err() {
                return;
            }
        }
        if SinkExt::<&[u8]>::flush(&mut framed).await.is_err() || disconnect {
            return;
        }
    }
}
