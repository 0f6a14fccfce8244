use crate::engine::{EngineError, EngineHandle};
use rollcall_core::AttendanceRecord;
use serde::Serialize;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceService {
    engine: EngineHandle,
    device: String,
}

impl AttendanceService {
    pub fn new(engine: EngineHandle, device: String) -> Self {
        Self { engine, device }
    }
}

#[derive(Serialize)]
struct RecordView<'a> {
    name: &'a str,
    time: String,
}

/// JSON array of `{name, time}` in recording order.
pub fn records_json(records: &[AttendanceRecord]) -> String {
    let view: Vec<RecordView<'_>> = records
        .iter()
        .map(|r| RecordView {
            name: &r.name,
            time: r.time_label(),
        })
        .collect();
    serde_json::to_string(&view).unwrap_or_else(|_| "[]".to_string())
}

fn to_fdo(e: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Start capturing and recording attendance.
    async fn start(&self) -> zbus::fdo::Result<String> {
        tracing::info!("start requested");
        match self.engine.start().await.map_err(to_fdo)? {
            true => Ok("started".into()),
            false => Ok("already running".into()),
        }
    }

    /// Stop capturing; the camera is released.
    async fn stop(&self) -> zbus::fdo::Result<String> {
        tracing::info!("stop requested");
        match self.engine.stop().await.map_err(to_fdo)? {
            true => Ok("stopped".into()),
            false => Ok("already idle".into()),
        }
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "camera": self.device,
            "state": status.state,
            "session_date": status.session_date,
            "identities": status.identities,
            "recorded": status.recorded,
        })
        .to_string())
    }

    /// Attendance recorded in the current session.
    async fn list_attendance(&self) -> zbus::fdo::Result<String> {
        let records = self.engine.records().await.map_err(to_fdo)?;
        Ok(records_json(&records))
    }

    /// A person was recorded for the first time this session.
    #[zbus(signal)]
    pub async fn attendance_recorded(emitter: &SignalEmitter<'_>, name: &str, time: &str) -> zbus::Result<()>;

    /// A ledger write failed; the person will be retried on their next sighting.
    #[zbus(signal)]
    pub async fn ledger_failed(emitter: &SignalEmitter<'_>, message: &str) -> zbus::Result<()>;
}
