//! Configuração do autopilot carregada a partir de `autopilot.toml`.
//!
//! A struct [`AutopilotConfig`] contém todos os parâmetros configuráveis:
//! URLs do portal, seletores, mapa de campos do formulário, temporização e
//! o navegador. Valores ausentes no arquivo usam defaults sensíveis.
//! As variáveis de ambiente `AUTOPILOT_STATE_DIR` e `AUTOPILOT_CHROME_URL`
//! têm precedência sobre o arquivo.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AutopilotError;

/// Configuração de nível superior carregada de `autopilot.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct AutopilotConfig {
    /// URLs e marcadores de caminho do portal Torrent Power.
    #[serde(default)]
    pub portal: PortalConfig,

    /// Seletores CSS usados pelos handlers de página.
    #[serde(default)]
    pub selectors: SelectorConfig,

    /// Campos do formulário de troca de nome, na ordem de preenchimento.
    #[serde(default = "default_form_fields")]
    pub form_fields: Vec<FormField>,

    /// Intervalos e orçamentos de polling.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Máximo de tentativas por etapa antes de marcar o fluxo como falho.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Diretório do armazenamento durável da sessão.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Como conectar ao Chrome.
    #[serde(default)]
    pub chrome: ChromeConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub host: String,
    pub landing_url: String,
    pub signin_url: String,
    pub applications_url: String,
    pub signin_path: String,
    pub applications_path: String,
    pub name_change_path: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            host: "connect.torrentpower.com".to_string(),
            landing_url: "https://connect.torrentpower.com".to_string(),
            signin_url: "https://connect.torrentpower.com/tplcp/session/signin".to_string(),
            applications_url: "https://connect.torrentpower.com/tplcp/application/myapplications"
                .to_string(),
            signin_path: "/session/signin".to_string(),
            applications_path: "/application/myapplications".to_string(),
            name_change_path: "/application/namechangerequest".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Presente enquanto o formulário de login está na tela.
    pub login_form: String,
    /// Controle que abre uma nova solicitação de troca de nome.
    pub new_request: String,
    /// Indica que o formulário de troca de nome terminou de renderizar.
    pub form_ready: String,
    pub submit: String,
    pub success_marker: String,
    pub error_marker: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            login_form: "input[type='password']".to_string(),
            new_request: "a[href*='namechangerequest']".to_string(),
            form_ready: "form".to_string(),
            submit: "button[type='submit']".to_string(),
            success_marker: ".alert-success, .swal2-success".to_string(),
            error_marker: ".alert-danger, .mat-error, .invalid-feedback".to_string(),
        }
    }
}

/// Associa uma chave de [`UserData`](crate::state_machine::UserData) a um seletor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FormField {
    pub key: String,
    pub selector: String,
}

impl FormField {
    pub fn new(key: &str, selector: &str) -> Self {
        Self {
            key: key.to_string(),
            selector: selector.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Intervalo fixo entre duas verificações do Waiter.
    pub poll_interval_ms: u64,
    /// Orçamento para elementos comuns aparecerem.
    pub element_max_polls: u32,
    /// Orçamento para o login manual do operador.
    pub login_max_polls: u32,
    /// Orçamento para o portal responder a um envio.
    pub outcome_max_polls: u32,
    /// Atraso base para o backoff entre tentativas.
    pub retry_base_delay_ms: u64,
    /// Teto do backoff entre tentativas.
    pub retry_max_delay_ms: u64,
    /// Intervalo com que o driver verifica se uma nova página carregou.
    pub page_check_ms: u64,
    /// Reexecuta o roteador na mesma página após este intervalo.
    pub rerun_after_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            element_max_polls: 40,
            login_max_polls: 600,
            outcome_max_polls: 60,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 8000,
            page_check_ms: 750,
            rerun_after_ms: 30_000,
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChromeConfig {
    /// Endpoint DevTools de um Chrome já aberto.
    pub debug_url: String,
    /// Executa o Chrome iniciado sem janela. O login manual exige `false`.
    pub headless: bool,
    /// Perfil persistente para que o login sobreviva entre execuções.
    pub profile_dir: PathBuf,
    /// Caminho explícito do executável; detectado automaticamente se ausente.
    pub path: Option<PathBuf>,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            debug_url: "http://127.0.0.1:9222".to_string(),
            headless: false,
            profile_dir: PathBuf::from("autopilot_profile"),
            path: None,
        }
    }
}

// Campos padrão do formulário de troca de nome.
fn default_form_fields() -> Vec<FormField> {
    vec![
        FormField::new("accountNo", "input[formcontrolname='serviceNo']"),
        FormField::new("name", "input[formcontrolname='newName']"),
        FormField::new("address", "textarea[formcontrolname='address']"),
        FormField::new("mobile", "input[formcontrolname='mobileNo']"),
        FormField::new("email", "input[formcontrolname='email']"),
        FormField::new("documentNo", "input[formcontrolname='documentNo']"),
        FormField::new("reason", "textarea[formcontrolname='reason']"),
    ]
}

// Valor padrão para tentativas máximas: 5.
fn default_max_retries() -> u32 {
    5
}

// Valor padrão para o diretório de estado.
fn default_state_dir() -> PathBuf {
    PathBuf::from(".autopilot")
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            portal: PortalConfig::default(),
            selectors: SelectorConfig::default(),
            form_fields: default_form_fields(),
            timing: TimingConfig::default(),
            max_retries: default_max_retries(),
            state_dir: default_state_dir(),
            chrome: ChromeConfig::default(),
        }
    }
}

impl AutopilotConfig {
    /// Carrega a configuração de `autopilot.toml` no diretório atual.
    pub fn load() -> Result<Self, AutopilotError> {
        Self::load_from(Path::new("autopilot.toml"))
    }

    /// Carrega a configuração do caminho dado.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load_from(path: &Path) -> Result<Self, AutopilotError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<AutopilotConfig>(&contents)?
        } else {
            Self::default()
        };

        // Variáveis de ambiente têm precedência sobre o arquivo.
        if let Some(dir) = non_empty_env("AUTOPILOT_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }
        if let Some(url) = non_empty_env("AUTOPILOT_CHROME_URL") {
            config.chrome.debug_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AutopilotError> {
        if self.max_retries == 0 {
            return Err(AutopilotError::Config(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.portal.host.trim().is_empty() {
            return Err(AutopilotError::Config("portal.host is empty".to_string()));
        }
        if self.form_fields.iter().any(|f| f.selector.trim().is_empty()) {
            return Err(AutopilotError::Config(
                "every form field needs a selector".to_string(),
            ));
        }
        Ok(())
    }

    /// Configuração com polling de 1ms para os testes.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        let mut config = Self::default();
        config.timing = TimingConfig {
            poll_interval_ms: 1,
            element_max_polls: 5,
            login_max_polls: 10,
            outcome_max_polls: 5,
            retry_base_delay_ms: 0,
            retry_max_delay_ms: 0,
            page_check_ms: 1,
            rerun_after_ms: 5,
        };
        config
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
