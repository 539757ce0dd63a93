use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use sqlx::postgres::PgPoolOptions;
use std::io;
use std::sync::Arc;

use quillpost::auth::{AuthMiddleware, PasswordPolicy};
use quillpost::mailer::{LogMailer, Mailer};
use quillpost::routes::{self, health, uploads::serve_file};
use quillpost::uploads::UploadStore;
use quillpost::Config;

fn startup_error(context: &str, err: impl std::fmt::Display) -> io::Error {
    log::error!("{}: {}", context, err);
    io::Error::new(io::ErrorKind::Other, format!("{}: {}", context, err))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = Config::from_env().map_err(|e| startup_error("Invalid configuration", e))?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .map_err(|e| startup_error("Failed to connect to database", e))?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .map_err(|e| startup_error("Failed to run migrations", e))?;

    tokio::fs::create_dir_all(&config.upload_dir).await?;

    let policy =
        PasswordPolicy::default().with_extra_common_passwords(config.extra_common_passwords.clone());
    let mailer: Arc<dyn Mailer> = Arc::new(LogMailer);
    let store = UploadStore::new(config.upload_dir.clone(), config.app_url.clone());

    let pool_data = web::Data::new(pool);
    let config_data = web::Data::new(config.clone());
    let policy_data = web::Data::new(policy);
    let mailer_data: web::Data<dyn Mailer> = web::Data::from(mailer);
    let store_data = web::Data::new(store);

    log::info!("Starting Quillpost server at {}", config.server_url());
    HttpServer::new(move || {
        App::new()
            .app_data(pool_data.clone())
            .app_data(config_data.clone())
            .app_data(policy_data.clone())
            .app_data(mailer_data.clone())
            .app_data(store_data.clone())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .wrap(Logger::default())
            .service(health::health)
            .service(serve_file)
            .service(
                web::scope("/api")
                    .wrap(AuthMiddleware::new(config_data.jwt.clone()))
                    .configure(routes::config),
            )
    })
    .bind((config.server_host.as_str(), config.server_port))?
    .run()
    .await
}
