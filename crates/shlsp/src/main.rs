//
// main.rs
//

mod analyzer;
mod backend;
mod config;
mod declarations;
mod parser_pool;
mod rename;
mod scanner;
mod scope;
mod sourcing;
mod state;
mod syntax;
mod workspace_index;

#[cfg(test)]
mod integration_tests;

use std::env;

fn print_usage() {
    println!("shlsp {}, a static Bash language server.", env!("CARGO_PKG_VERSION"));
    print!(
        r#"
Usage: shlsp [OPTIONS]

Available options:

--stdio                      Start the LSP server using stdio transport
--version                    Print the version
--help                       Print this help message

"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut argv = env::args();
    argv.next(); // skip executable name

    let mut use_stdio = false;

    for arg in argv {
        match arg.as_str() {
            "--stdio" => use_stdio = true,
            "--version" => {
                println!("shlsp {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_usage();
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("Unknown argument: '{other}'"));
            }
        }
    }

    if !use_stdio {
        print_usage();
        return Ok(());
    }

    env_logger::init();

    backend::start_lsp().await
}
