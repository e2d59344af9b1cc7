use anyhow::Result;
use log::info;
use tsession::{
    CompressionType, Config, EmbeddedServer, ServerConfig, Session, SessionError, TSDataType,
    TSEncoding,
};

const DEVICE: &str = "root.sg1.d1";
const MEASUREMENTS: [&str; 3] = ["s1", "s2", "s3"];

fn main() -> Result<()> {
    env_logger::init();

    let server = EmbeddedServer::start(ServerConfig::default())?;
    info!("embedded server listening on {}", server.address());

    let remaining = Session::scoped(Config::default(), server.clone(), |session| {
        session.set_storage_group("root.sg1")?;
        for m in MEASUREMENTS {
            session.create_timeseries(
                &format!("{}.{}", DEVICE, m),
                TSDataType::Int64,
                TSEncoding::Rle,
                CompressionType::Snappy,
            )?;
        }

        for time in 0..100 {
            session.insert(DEVICE, time, &MEASUREMENTS, ["1", "2", "3"])?;
        }

        let paths: Vec<String> = MEASUREMENTS
            .iter()
            .map(|m| format!("{}.{}", DEVICE, m))
            .collect();
        session.delete_data(paths.as_slice(), 99)?;

        let mut remaining = 0;
        for path in &paths {
            remaining += session.select(path, i64::MIN, i64::MAX)?.len();
        }
        Ok::<_, SessionError>(remaining)
    })?;
    println!("points remaining after delete: {}", remaining);

    server.shutdown();
    Ok(())
}
