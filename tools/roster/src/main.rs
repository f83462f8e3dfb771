fn main() -> anyhow::Result<()> {
    roster_cli::run()
}
