use std::io::{self, Write};

use anyhow::Result;
use tracing::info;

use crate::cli::CheckSqlArgs;
use crate::model::TierScore;
use crate::scoring::SecurityGate;
use crate::scoring::functional::{FunctionalScorer, SECURITY, VALIDITY};
use crate::store::ReferenceStore;

pub fn run(args: CheckSqlArgs) -> Result<()> {
    info!(
        owner_column = %args.owner_column,
        owner_id = args.owner_id,
        with_database = args.db_path.is_some(),
        "checking sql"
    );

    let checks = match &args.db_path {
        Some(db_path) => {
            let store = ReferenceStore::open_read_only(db_path)?;
            let scorer = FunctionalScorer::new(store, &args.owner_column)?;
            let checks = vec![
                (
                    SECURITY,
                    scorer.evaluate_security_compliance(&args.sql, args.owner_id),
                ),
                (VALIDITY, scorer.evaluate_sql_validity(&args.sql)),
            ];
            scorer.close()?;
            checks
        }
        None => {
            let gate = SecurityGate::new(&args.owner_column)?;
            vec![(SECURITY, gate.evaluate(&args.sql, args.owner_id))]
        }
    };

    let mut output = io::BufWriter::new(io::stdout().lock());
    write_checks(&mut output, &checks)?;
    output.flush()?;
    Ok(())
}

fn write_checks(output: &mut impl Write, checks: &[(&str, TierScore)]) -> Result<()> {
    for (name, score) in checks {
        writeln!(output, "{name}\t{:.2}\t{}", score.value, score.explanation)?;
    }
    Ok(())
}
