//! Armazenamento durável da sessão de automação.
//!
//! Toda navegação destrói o estado da página, então o progresso vive em um
//! armazenamento chave-valor que sobrevive a recargas. O [`FileStore`] grava
//! cada chave em um arquivo JSON de forma atômica (arquivo temporário, fsync,
//! rename), garantindo que a próxima carga de página leia a última escrita.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::AutopilotError;
use crate::state_machine::{AutomationSession, FlowReport};

/// Chave fixa sob a qual a sessão é persistida.
pub const SESSION_KEY: &str = "torrent_power_name_change";

/// Armazenamento chave-valor com leitura-após-escrita consistente.
pub trait SessionStore {
    fn read(&self, key: &str) -> Result<Option<String>, AutopilotError>;
    fn write(&self, key: &str, value: &str) -> Result<(), AutopilotError>;
    fn remove(&self, key: &str) -> Result<(), AutopilotError>;
    /// Arquiva o relatório de um fluxo encerrado.
    fn archive_report(&self, report: &FlowReport) -> Result<(), AutopilotError>;

    /// Lê a sessão persistida.
    ///
    /// Um registro ilegível (escrita interrompida, JSON truncado) é tratado
    /// como ausente em vez de derrubar o processo.
    fn load_session(&self) -> Result<Option<AutomationSession>, AutopilotError> {
        let Some(raw) = self.read(SESSION_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str::<AutomationSession>(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(error = %e, "discarding unreadable session record");
                Ok(None)
            }
        }
    }

    fn save_session(&self, session: &AutomationSession) -> Result<(), AutopilotError> {
        let raw = serde_json::to_string(session)?;
        self.write(SESSION_KEY, &raw)?;
        debug!(step = %session.step, retry = session.retry_count, "session saved");
        Ok(())
    }

    fn clear_session(&self) -> Result<(), AutopilotError> {
        self.remove(SESSION_KEY)
    }
}

/// Armazenamento em disco: um arquivo `<chave>.json` por chave.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Caminho onde o relatório de uma sessão é gravado.
    pub fn report_path(&self, session_id: &str) -> PathBuf {
        self.dir.join("reports").join(format!("{session_id}.json"))
    }
}

// Grava `contents` em `path` via arquivo temporário + rename.
fn write_atomic(path: &Path, contents: &str) -> Result<(), AutopilotError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

impl SessionStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<String>, AutopilotError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), AutopilotError> {
        write_atomic(&self.path_for(key), value)
    }

    fn remove(&self, key: &str) -> Result<(), AutopilotError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn archive_report(&self, report: &FlowReport) -> Result<(), AutopilotError> {
        let raw = serde_json::to_string_pretty(report)?;
        write_atomic(&self.report_path(&report.session_id), &raw)
    }
}

/// Armazenamento em memória compartilhável entre "cargas de página" nos testes.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: std::rc::Rc<std::cell::RefCell<std::collections::HashMap<String, String>>>,
    pub reports: std::rc::Rc<std::cell::RefCell<Vec<FlowReport>>>,
}

#[cfg(test)]
impl SessionStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>, AutopilotError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), AutopilotError> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AutopilotError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }

    fn archive_report(&self, report: &FlowReport) -> Result<(), AutopilotError> {
        self.reports.borrow_mut().push(report.clone());
        Ok(())
    }
}
