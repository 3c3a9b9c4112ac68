fn main() -> anyhow::Result<()> {
    guardian_lib::run()
}
