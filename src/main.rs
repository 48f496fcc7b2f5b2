mod api;
mod app;
mod model;
mod storage;

fn main() -> eframe::Result<()> {
    env_logger::init();
    let native_options = eframe::NativeOptions::default();
    eframe::run_native(
        "ParcelMap",
        native_options,
        Box::new(|cc| Ok(Box::new(app::ParcelApp::new(cc)?))),
    )
}
