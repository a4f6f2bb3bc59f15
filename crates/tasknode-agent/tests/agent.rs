use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tasknode_agent::proto::{
    CleanArgs, CrontabArgs, DaemonArgs, DaemonLogArgs, ExecReply, GetArgs, IdsArgs, LogArgs,
    NodeRecord, NodeSync, NoticeArgs,
};
use tasknode_agent::Agent;
use tasknode_core::TaskNodeConfig;
use tasknode_rpc::frames::codes;
use tasknode_rpc::{
    decode_args, encode_reply, methods, serve, ClientPool, ErrorShape, Router, RpcError, Service,
};
use tasknode_store::{
    Crontab, CrontabDraft, CrontabLog, CrontabStatus, Daemon, DaemonDraft, DaemonStatus,
    ExecStatus, Page, TriggerAction,
};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Stand-in control plane that records what nodes send it.
#[derive(Default)]
struct ControlPlane {
    syncs: Mutex<Vec<NodeSync>>,
    notices: Mutex<Vec<NoticeArgs>>,
}

#[async_trait]
impl Service for ControlPlane {
    fn name(&self) -> &'static str {
        "Serve"
    }

    fn methods(&self) -> &'static [&'static str] {
        &["Sync", "DingTalkNotice"]
    }

    async fn call(&self, method: &str, body: &[u8]) -> Result<Vec<u8>, ErrorShape> {
        match method {
            "Sync" => {
                let sync: NodeSync = decode_args(body)?;
                let record = NodeRecord {
                    id: 7,
                    name: sync.node.name.clone(),
                    address: sync.address.clone(),
                    sync_time: 1,
                };
                self.syncs.lock().unwrap().push(sync);
                encode_reply(&record)
            }
            "DingTalkNotice" => {
                let notice: NoticeArgs = decode_args(body)?;
                self.notices.lock().unwrap().push(notice);
                encode_reply(&true)
            }
            _ => Err(ErrorShape::new(codes::METHOD_NOT_FOUND, method)),
        }
    }
}

struct Harness {
    agent: Agent,
    addr: String,
    clients: ClientPool,
    plane: Arc<ControlPlane>,
    plane_shutdown: watch::Sender<bool>,
    _dir: TempDir,
}

impl Harness {
    async fn start() -> Self {
        let plane = Arc::new(ControlPlane::default());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let manage = listener.local_addr().unwrap().to_string();
        let (plane_shutdown, rx) = watch::channel(false);
        let router = Arc::new(Router::new().register(plane.clone()));
        tokio::spawn(serve(listener, router, rx));

        let dir = tempfile::tempdir().unwrap();
        let mut config = TaskNodeConfig::default();
        config.node.name = "test-node".into();
        config.node.heartbeat_interval_secs = 1;
        config.rpc.listen_addr = "127.0.0.1:0".into();
        config.rpc.manage_addr = manage;
        config.database.path = dir.path().join("db/tasknode.db").display().to_string();
        config.daemon.log_dir = dir.path().join("daemon").display().to_string();
        config.scheduler.poll_interval_ms = 50;

        let agent = Agent::start(config).await.unwrap();
        let addr = agent.local_addr().to_string();
        Self {
            agent,
            addr,
            clients: ClientPool::default(),
            plane,
            plane_shutdown,
            _dir: dir,
        }
    }

    async fn call<A, R>(&self, method: &str, args: &A) -> Result<R, RpcError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.clients
            .call(&self.addr, method, &CancellationToken::new(), args)
            .await
    }

    async fn add_crontab(&self, draft: CrontabDraft) -> Crontab {
        let job: Crontab = self
            .call(
                methods::CRONTAB_ADD,
                &CrontabArgs {
                    id: 0,
                    draft,
                    user_id: 1,
                },
            )
            .await
            .unwrap();
        assert_eq!(job.status, CrontabStatus::Unaudited);
        let audited: Vec<Crontab> = self
            .call(methods::CRONTAB_AUDIT, &ids(job.id))
            .await
            .unwrap();
        assert_eq!(audited[0].status, CrontabStatus::Ok);
        job
    }

    async fn logs(&self, crontab_id: i64) -> Page<CrontabLog> {
        self.call(
            methods::CRONTAB_LOG,
            &LogArgs {
                crontab_id,
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    async fn crontab(&self, id: i64) -> Crontab {
        self.call(methods::CRONTAB_GET, &GetArgs { id }).await.unwrap()
    }

    async fn daemon(&self, id: i64) -> Daemon {
        self.call(methods::DAEMON_GET, &GetArgs { id }).await.unwrap()
    }

    async fn stop(self) {
        self.agent.shutdown().await;
        let _ = self.plane_shutdown.send(true);
    }
}

fn ids(id: i64) -> IdsArgs {
    IdsArgs {
        ids: vec![id],
        user_id: 1,
    }
}

async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn scheduled_job_runs_until_stopped() {
    let h = Harness::start().await;
    let hr = &h;
    let job = h
        .add_crontab(CrontabDraft {
            name: "hello".into(),
            command: "echo hello".into(),
            time_expr: "* * * * * *".into(),
            ..Default::default()
        })
        .await;
    let id = job.id;

    let started: Vec<Crontab> = h.call(methods::CRONTAB_START, &ids(job.id)).await.unwrap();
    assert!(started[0].status.is_scheduled());
    assert!(started[0].next_exec_time > 0);

    assert!(
        eventually(Duration::from_secs(5), move || async move {
            hr.logs(id).await.total > 0
        })
        .await
    );
    let log = h.logs(job.id).await.items.remove(0);
    assert_eq!(log.status, ExecStatus::Success);
    assert_eq!(log.result, "hello");
    assert!(!log.once);

    let stopped: Vec<Crontab> = h.call(methods::CRONTAB_STOP, &ids(job.id)).await.unwrap();
    assert_eq!(stopped[0].status, CrontabStatus::Stopped);
    assert!(h.agent.crontabs().wait_idle(Duration::from_secs(2)).await);

    let settled = h.logs(job.id).await.total;
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(h.logs(job.id).await.total, settled);
    let job = h.crontab(job.id).await;
    assert_eq!(job.status, CrontabStatus::Stopped);
    assert!(job.last_exec_status.is_some());

    h.stop().await;
}

#[tokio::test]
async fn timeout_notifies_and_keeps_schedule() {
    let h = Harness::start().await;
    let hr = &h;
    let job = h
        .add_crontab(CrontabDraft {
            name: "slow".into(),
            command: "sleep 5".into(),
            time_expr: "*/3 * * * * *".into(),
            timeout: 1,
            timeout_trigger: vec![
                TriggerAction::NotifyExternal,
                TriggerAction::NotifyExternal,
            ],
            notify_addrs: vec!["https://hooks.example/robot".into()],
            ..Default::default()
        })
        .await;
    let id = job.id;
    let _: Vec<Crontab> = h.call(methods::CRONTAB_START, &ids(job.id)).await.unwrap();

    assert!(
        eventually(Duration::from_secs(8), move || async move {
            hr.logs(id).await.total > 0
        })
        .await
    );
    let log = h.logs(job.id).await.items.remove(0);
    assert_eq!(log.status, ExecStatus::Timeout);

    assert!(
        eventually(Duration::from_secs(2), move || async move {
            !hr.plane.notices.lock().unwrap().is_empty()
        })
        .await
    );
    {
        let notices = h.plane.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].addresses, vec!["https://hooks.example/robot"]);
        assert!(notices[0].body.contains("task timeout"));
        assert!(notices[0].body.contains("slow"));
    }
    assert!(h.crontab(job.id).await.status.is_scheduled());

    let _: Vec<Crontab> = h.call(methods::CRONTAB_STOP, &ids(job.id)).await.unwrap();
    h.stop().await;
}

#[tokio::test]
async fn manual_exec_is_logged_once_and_cleaned() {
    let h = Harness::start().await;
    let hr = &h;
    let job = h
        .add_crontab(CrontabDraft {
            name: "once".into(),
            command: "echo manual; exit 2".into(),
            time_expr: "0 0 3 * * *".into(),
            ..Default::default()
        })
        .await;
    let id = job.id;

    let reply: ExecReply = h.call(methods::CRONTAB_EXEC, &ids(job.id)).await.unwrap();
    assert_eq!(reply.runs.len(), 1);
    assert_eq!(reply.runs[0].crontab_id, job.id);
    assert!(!reply.runs[0].run_id.is_empty());

    assert!(
        eventually(Duration::from_secs(3), move || async move {
            hr.logs(id).await.total == 1
        })
        .await
    );
    let log = h.logs(job.id).await.items.remove(0);
    assert!(log.once);
    assert_eq!(log.status, ExecStatus::Error);
    assert_eq!(log.result, "manual");
    assert_eq!(h.crontab(job.id).await.status, CrontabStatus::Ok);

    let removed: u64 = h
        .call(methods::CRONTAB_CLEAN, &CleanArgs { crontab_id: job.id })
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(h.logs(job.id).await.total, 0);

    let deleted: Vec<i64> = h.call(methods::CRONTAB_DEL, &ids(job.id)).await.unwrap();
    assert_eq!(deleted, vec![job.id]);
    let err = h
        .call::<_, Crontab>(methods::CRONTAB_GET, &GetArgs { id: job.id })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");

    h.stop().await;
}

#[tokio::test]
async fn failing_daemon_gives_up_and_logs() {
    let h = Harness::start().await;
    let hr = &h;
    let daemon: Daemon = h
        .call(
            methods::DAEMON_ADD,
            &DaemonArgs {
                id: 0,
                draft: DaemonDraft {
                    name: "flaky".into(),
                    command: "echo run; exit 3".into(),
                    failed_restart_num: 1,
                    failed_notice: vec![TriggerAction::NotifyExternal],
                    notify_addrs: vec!["https://hooks.example/robot".into()],
                    ..Default::default()
                },
                user_id: 1,
            },
        )
        .await
        .unwrap();
    let id = daemon.id;
    let _: Vec<Daemon> = h.call(methods::DAEMON_AUDIT, &ids(daemon.id)).await.unwrap();
    let started: Vec<Daemon> = h.call(methods::DAEMON_START, &ids(daemon.id)).await.unwrap();
    assert_eq!(started[0].status, DaemonStatus::Running);

    assert!(
        eventually(Duration::from_secs(5), move || async move {
            hr.daemon(id).await.status == DaemonStatus::Stopped
        })
        .await
    );
    let stopped = h.daemon(daemon.id).await;
    assert!(stopped.failed);
    assert!(stopped
        .failed_reason
        .starts_with("no retry enabled or max retries reached"));

    let reply: tasknode_agent::proto::DaemonLogReply = h
        .call(
            methods::DAEMON_LOG,
            &DaemonLogArgs {
                id: daemon.id,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(reply.lines, vec!["run", "run"]);
    assert!(reply.offset > 0);

    assert!(
        eventually(Duration::from_secs(2), move || async move {
            hr.plane
                .notices
                .lock()
                .unwrap()
                .iter()
                .any(|n| n.body.contains("task failed"))
        })
        .await
    );

    let err = h
        .call::<_, tasknode_agent::proto::DaemonLogReply>(
            methods::DAEMON_LOG,
            &DaemonLogArgs {
                id: daemon.id,
                date: "../../etc".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::BAD_REQUEST);

    h.stop().await;
}

#[tokio::test]
async fn batch_calls_skip_unknown_ids() {
    let h = Harness::start().await;
    let job = h
        .add_crontab(CrontabDraft {
            name: "batch".into(),
            command: "sleep 1".into(),
            time_expr: "0 0 3 * * *".into(),
            ..Default::default()
        })
        .await;
    let both = IdsArgs {
        ids: vec![job.id, 9_999],
        user_id: 1,
    };

    let reply: ExecReply = h.call(methods::CRONTAB_EXEC, &both).await.unwrap();
    assert_eq!(reply.runs.len(), 1);
    assert_eq!(reply.runs[0].crontab_id, job.id);
    assert_eq!(h.agent.crontabs().running(job.id), 1);

    let started: Vec<Crontab> = h.call(methods::CRONTAB_START, &both).await.unwrap();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].id, job.id);
    assert_eq!(started[0].status, CrontabStatus::Timing);

    let stopped: Vec<Crontab> = h.call(methods::CRONTAB_STOP, &both).await.unwrap();
    assert_eq!(stopped.len(), 1);
    assert_eq!(stopped[0].status, CrontabStatus::Stopped);

    h.stop().await;
}

async fn add_daemon(h: &Harness, draft: DaemonDraft) -> Daemon {
    let daemon: Daemon = h
        .call(
            methods::DAEMON_ADD,
            &DaemonArgs {
                id: 0,
                draft,
                user_id: 1,
            },
        )
        .await
        .unwrap();
    let _: Vec<Daemon> = h.call(methods::DAEMON_AUDIT, &ids(daemon.id)).await.unwrap();
    daemon
}

fn watched_daemon() -> DaemonDraft {
    DaemonDraft {
        name: "watched".into(),
        command: "sleep 30".into(),
        failed_notice: vec![TriggerAction::NotifyExternal, TriggerAction::NotifyExternal],
        notify_addrs: vec!["https://hooks.example/robot".into()],
        ..Default::default()
    }
}

#[tokio::test]
async fn stopping_a_daemon_sends_one_notice() {
    let h = Harness::start().await;
    let hr = &h;
    let daemon = add_daemon(&h, watched_daemon()).await;
    let _: Vec<Daemon> = h.call(methods::DAEMON_START, &ids(daemon.id)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stopped: Vec<Daemon> = h.call(methods::DAEMON_STOP, &ids(daemon.id)).await.unwrap();
    assert_eq!(stopped[0].status, DaemonStatus::Stopped);
    assert_eq!(stopped[0].failed_reason, "manually stopped");

    assert!(
        eventually(Duration::from_secs(2), move || async move {
            !hr.plane.notices.lock().unwrap().is_empty()
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(300)).await;
    {
        let notices = h.plane.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].body.contains("task failed"));
        assert!(notices[0].body.contains("manually stopped"));
    }
    h.stop().await;
}

#[tokio::test]
async fn shutdown_stops_daemons_quietly() {
    let h = Harness::start().await;
    let daemon = add_daemon(&h, watched_daemon()).await;
    let _: Vec<Daemon> = h.call(methods::DAEMON_START, &ids(daemon.id)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let plane = h.plane.clone();
    h.stop().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(plane.notices.lock().unwrap().is_empty());
}

#[tokio::test]
async fn heartbeat_reports_node_counts() {
    let h = Harness::start().await;
    let hr = &h;
    h.add_crontab(CrontabDraft {
        name: "counted".into(),
        command: "true".into(),
        time_expr: "0 0 3 * * *".into(),
        ..Default::default()
    })
    .await;

    assert!(
        eventually(Duration::from_secs(4), move || async move {
            hr.plane
                .syncs
                .lock()
                .unwrap()
                .iter()
                .any(|s| s.node.name == "test-node")
        })
        .await
    );
    h.stop().await;
}

#[tokio::test]
async fn unknown_method_is_rejected() {
    let h = Harness::start().await;
    let err = h
        .call::<_, ()>("CrontabServe.Nope", &ids(1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::METHOD_NOT_FOUND);

    let err = h
        .call::<_, ()>(methods::CRONTAB_START, &IdsArgs::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::BAD_REQUEST);

    h.call::<_, ()>(methods::PING, &()).await.unwrap();
    h.stop().await;
}
