use wirebot::cli;
use wirebot::core::terminal;

#[tokio::main]
async fn main() {
    match cli::run_main().await {
        Ok(()) => {}
        Err(e) => {
            terminal::print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}
