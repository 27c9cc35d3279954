fn main() {
    telemetry_sync::run()
}
