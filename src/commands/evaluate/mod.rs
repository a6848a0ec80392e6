mod orchestrator;
mod report;
mod run;

pub(crate) use run::run;
