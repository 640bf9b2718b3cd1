//! Interface de linha de comando do autopilot baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (init, run, status,
//! cancel, resume, classify) e flags globais (--max-retries, --verbose).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::error::AutopilotError;
use crate::state_machine::UserData;

/// Automação do pedido de troca de nome no portal Torrent Power.
#[derive(Debug, Parser)]
#[command(name = "torrent-autopilot", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Número máximo de tentativas por passo antes de falhar.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Habilita logs detalhados (nível debug).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Cria uma nova sessão de automação com os dados do requerente.
    Init(InitArgs),

    /// Conecta ao Chrome e conduz o fluxo até o envio ou a falha.
    Run,

    /// Mostra a sessão persistida.
    Status,

    /// Remove a sessão persistida.
    Cancel,

    /// Reinicia uma sessão com falha a partir do começo.
    Resume,

    /// Mostra como uma URL é classificada.
    Classify {
        url: String,
    },
}

/// Dados do requerente: de um arquivo JSON ou de flags individuais.
#[derive(Debug, Args)]
pub struct InitArgs {
    /// Arquivo JSON com os dados (campos em camelCase).
    #[arg(long, conflicts_with_all = ["name", "account_no"])]
    pub data: Option<PathBuf>,

    /// Novo nome do titular.
    #[arg(long)]
    pub name: Option<String>,

    /// Número da conta (service number).
    #[arg(long)]
    pub account_no: Option<String>,

    #[arg(long)]
    pub address: Option<String>,

    #[arg(long)]
    pub mobile: Option<String>,

    #[arg(long)]
    pub email: Option<String>,

    #[arg(long)]
    pub document_no: Option<String>,

    /// Motivo da troca de nome.
    #[arg(long)]
    pub reason: Option<String>,
}

impl InitArgs {
    /// Monta e valida os [`UserData`] a partir dos argumentos.
    pub fn user_data(&self) -> Result<UserData, AutopilotError> {
        let data = match &self.data {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                serde_json::from_str(&content)?
            }
            None => UserData {
                name: self.name.clone().unwrap_or_default(),
                account_no: self.account_no.clone().unwrap_or_default(),
                address: self.address.clone(),
                mobile: self.mobile.clone(),
                email: self.email.clone(),
                document_no: self.document_no.clone(),
                reason: self.reason.clone(),
            },
        };
        data.validate()?;
        Ok(data)
    }
}
