use anyhow::Result;
use clap::Parser;
use simple_logger::SimpleLogger;
use timetable_server::app::TimetableApp;

#[tokio::main]
async fn main() -> Result<()> {
    let app = TimetableApp::parse();
    SimpleLogger::new().with_level(app.log_level).env().init()?;
    app.run().await
}
