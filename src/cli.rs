//! Interface de linha de comando do streamline baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, apply, pulse, ledger)
//! e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::jobs::{CandidateFilter, WorkType};
use crate::pacing::SpeedTier;

/// streamline — candidaturas automáticas com ritmo controlado e pulso de segurança.
#[derive(Debug, Parser)]
#[command(name = "streamline", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho para o arquivo de configuração (padrão: ./streamline.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Argumento de velocidade aceito pela CLI, mapeado para [`SpeedTier`] internamente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SpeedArg {
    /// Maior intervalo entre candidaturas.
    Safe,
    Normal,
    /// Menor intervalo entre candidaturas.
    Fast,
}

impl From<SpeedArg> for SpeedTier {
    fn from(arg: SpeedArg) -> Self {
        match arg {
            SpeedArg::Safe => SpeedTier::Safe,
            SpeedArg::Normal => SpeedTier::Normal,
            SpeedArg::Fast => SpeedTier::Fast,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WorkTypeArg {
    Remote,
    Hybrid,
    Onsite,
}

impl From<WorkTypeArg> for WorkType {
    fn from(arg: WorkTypeArg) -> Self {
        match arg {
            WorkTypeArg::Remote => WorkType::Remote,
            WorkTypeArg::Hybrid => WorkType::Hybrid,
            WorkTypeArg::Onsite => WorkType::OnSite,
        }
    }
}

/// Filtros aplicados à lista de vagas antes da execução.
#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    /// Arquivo JSON com as vagas (padrão: catálogo embutido).
    #[arg(long)]
    pub jobs: Option<PathBuf>,

    /// Fonte da vaga (LinkedIn, Naukri, ...).
    #[arg(long)]
    pub source: Option<String>,

    #[arg(long, value_enum)]
    pub work_type: Option<WorkTypeArg>,

    /// Trecho que a localização deve conter.
    #[arg(long)]
    pub location: Option<String>,

    /// Pontuação mínima de compatibilidade.
    #[arg(long, default_value_t = 70)]
    pub min_match: u8,

    /// Busca por empresa ou cargo.
    #[arg(long)]
    pub search: Option<String>,
}

impl FilterArgs {
    pub fn to_filter(&self) -> CandidateFilter {
        CandidateFilter {
            source: self.source.clone(),
            work_type: self.work_type.map(WorkType::from),
            location: self.location.clone(),
            min_match: self.min_match,
            search: self.search.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa o auto-apply sobre as vagas filtradas.
    Run {
        /// Nível de velocidade (padrão: configuração).
        #[arg(long, value_enum)]
        speed: Option<SpeedArg>,

        /// Currículo a usar; o auto-apply exige um currículo existente.
        #[arg(long)]
        resume: Option<PathBuf>,

        /// Pede aprovação para cada vaga em vez de confirmar automaticamente.
        #[arg(long, default_value_t = false)]
        manual: bool,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Candidata-se a uma única vaga com aprovação manual.
    Apply {
        /// Empresa da vaga.
        company: String,

        /// Cargo da vaga.
        title: String,

        #[arg(long)]
        jobs: Option<PathBuf>,
    },

    /// Mostra o status atual do pulso, opcionalmente alterando-o antes.
    Pulse {
        #[command(subcommand)]
        action: Option<PulseAction>,
    },

    /// Lista as candidaturas registradas.
    Ledger {
        /// Emite as linhas em JSON em vez de tabela.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

/// Alterações manuais no pulso persistido.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum PulseAction {
    /// Define a saúde (0 a 100).
    Health {
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        value: u8,
    },
    /// Aprova o lote atual e inicia o cooldown configurado.
    Approve,
    /// Interrompe qualquer execução futura até um reset.
    Halt,
    /// Sai do estado `halted` com um lote novo.
    Reset,
}
