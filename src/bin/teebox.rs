use anyhow::Result;

fn main() -> Result<()> {
    teebox::cli::run()
}
