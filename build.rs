use std::{env, fs, path::PathBuf, str::FromStr};

use sqlx::{sqlite::SqliteConnectOptions, ConnectOptions};

/// Builds a scratch database at `OUT_DIR/build-schema.sqlite` so `sqlx::query!`
/// can verify queries against the real schema at compile time, mirroring the
/// teacher's own `build.rs`.
#[tokio::main]
async fn main() {
    println!("cargo:rerun-if-changed=init.sql");

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let db_path = out_dir.join("build-schema.sqlite");
    let _ = fs::remove_file(&db_path);

    let db_url = format!("sqlite://{}", db_path.to_string_lossy());
    let mut connection = SqliteConnectOptions::from_str(&db_url)
        .unwrap()
        .create_if_missing(true)
        .connect()
        .await
        .unwrap();

    let init_query = fs::read_to_string("init.sql").unwrap();
    sqlx::query(&init_query)
        .execute(&mut connection)
        .await
        .unwrap();

    println!("cargo:rustc-env=DATABASE_URL={db_url}");
}
