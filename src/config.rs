//! Configuração do streamline carregada a partir de `streamline.toml`.
//!
//! A struct [`StreamlineConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `STREAMLINE_SPEED` tem precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::engine::EngineSettings;
use crate::pacing::{PacingPolicy, SpeedTier};
use crate::state_machine::{ApprovalPolicy, TemplateTailor};

/// Arquivo procurado no diretório atual quando `--config` não é informado.
pub const DEFAULT_CONFIG_FILE: &str = "streamline.toml";

/// Configuração de nível superior carregada de `streamline.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamlineConfig {
    /// Atrasos por nível de velocidade (tabela `[pacing]`).
    #[serde(default)]
    pub pacing: PacingPolicy,

    /// Nível de velocidade padrão quando não especificado via CLI.
    #[serde(default)]
    pub default_speed: SpeedTier,

    /// Duração de cada etapa automática do pipeline, em milissegundos.
    #[serde(default = "default_stage_interval_ms")]
    pub stage_interval_ms: u64,

    /// Abaixo desta saúde o motor pausa.
    #[serde(default = "default_health_floor")]
    pub health_floor: u8,

    /// Candidaturas por lote antes de exigir aprovação humana.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Cooldown após a aprovação de um lote, em segundos.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Política no ponto de aprovação durante execuções automáticas.
    #[serde(default)]
    pub approval: ApprovalPolicy,

    /// Quantas entradas recentes o log de atividade exibe.
    #[serde(default = "default_log_window")]
    pub log_window: usize,

    /// Nível de log usado quando `RUST_LOG` não está definido.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Arquivo JSON onde o ledger de candidaturas é persistido.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// Arquivo JSON onde o estado do pulso é persistido entre execuções.
    #[serde(default = "default_pulse_path")]
    pub pulse_path: PathBuf,

    /// Perfil usado pelo tailor de templates (tabela `[profile]`).
    #[serde(default)]
    pub profile: ProfileConfig,
}

/// Perfil do candidato usado para montar a carta de apresentação.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub skills: Vec<String>,
    pub highlight: String,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            skills: ["Product", "Fintech", "API", "B2B", "SaaS", "Payroll", "Python"]
                .map(String::from)
                .to_vec(),
            highlight: "At RazorpayX, I managed merchant onboarding increasing adoption by 45% \
                        while implementing complex GST integrations."
                .to_string(),
        }
    }
}

// Valor padrão para a etapa do pipeline: 900ms.
fn default_stage_interval_ms() -> u64 {
    900
}

fn default_health_floor() -> u8 {
    40
}

// Lote padrão de 3 candidaturas antes de pedir aprovação.
fn default_batch_size() -> u32 {
    3
}

// 20 minutos.
fn default_cooldown_secs() -> u64 {
    1200
}

fn default_log_window() -> usize {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("streamline-ledger.json")
}

fn default_pulse_path() -> PathBuf {
    PathBuf::from("streamline-pulse.json")
}

impl Default for StreamlineConfig {
    fn default() -> Self {
        Self {
            pacing: PacingPolicy::default(),
            default_speed: SpeedTier::default(),
            stage_interval_ms: default_stage_interval_ms(),
            health_floor: default_health_floor(),
            batch_size: default_batch_size(),
            cooldown_secs: default_cooldown_secs(),
            approval: ApprovalPolicy::default(),
            log_window: default_log_window(),
            log_level: default_log_level(),
            ledger_path: default_ledger_path(),
            pulse_path: default_pulse_path(),
            profile: ProfileConfig::default(),
        }
    }
}

impl StreamlineConfig {
    /// Carrega a configuração de `path`, ou de `streamline.toml` no diretório atual.
    /// Usa valores padrão se o arquivo padrão não existir; um `path` explícito deve existir.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };

        // Variável de ambiente tem precedência sobre o arquivo para a velocidade padrão.
        if let Ok(speed) = std::env::var("STREAMLINE_SPEED")
            && !speed.is_empty()
        {
            config.default_speed = speed.parse().map_err(anyhow::Error::msg)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    /// Rejeita combinações que o motor não consegue respeitar.
    pub fn validate(&self) -> Result<()> {
        if self.health_floor > 100 {
            bail!("health_floor must be within 0..=100, got {}", self.health_floor);
        }
        if !self.pacing.is_ordered() {
            bail!("pacing delays must satisfy safe >= normal >= fast");
        }
        Ok(())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            pacing: self.pacing.clone(),
            stage_interval: Duration::from_millis(self.stage_interval_ms),
            health_floor: self.health_floor,
            approval: self.approval,
        }
    }

    pub fn tailor(&self) -> TemplateTailor {
        TemplateTailor::new(self.profile.skills.clone(), self.profile.highlight.clone())
    }
}
