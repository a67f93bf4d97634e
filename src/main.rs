use bursar::LedgerError;
use bursar::cli::Cli;
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    bursar::logging::init(cli.verbose);

    if let Err(err) = cli.run().await {
        match err.downcast_ref::<LedgerError>() {
            Some(ledger_err) => eprintln!("Error [{}]: {:#}", ledger_err.kind(), err),
            None => eprintln!("Error: {:#}", err),
        }
        std::process::exit(1);
    }
}
