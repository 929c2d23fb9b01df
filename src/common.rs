pub fn setup_tracing() {
    use tracing_subscriber::fmt::Subscriber;
    use tracing_subscriber::EnvFilter;

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }

    // Stdout carries peer response text in connect mode; logs go to stderr.
    Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}
