//! pvm-cli/src/main.rs
//!
//! Point d'entrée du binaire `pvm`. Met en place le reporting d'erreurs et
//! le tracing, puis délègue à `pvm_cli::run()`.

fn main() {
    if let Err(e) = color_eyre::install() {
        eprintln!("warning: color-eyre already installed: {e}");
    }

    if let Err(err) = pvm_cli::run() {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}
