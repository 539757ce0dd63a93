#[macro_use]
mod common;

use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceResponse};
use actix_web::http::{header, StatusCode};
use actix_web::test;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::io::Cursor;
use std::path::PathBuf;

use common::{cleanup_users, connect, lazy_pool, register_user, TestUser};
use quillpost::auth::generate_token_pair;

const BOUNDARY: &str = "quillpost-form-boundary";

enum Part<'a> {
    Text(&'a str, &'a str),
    File {
        filename: &'a str,
        mime: &'a str,
        bytes: &'a [u8],
    },
}

fn multipart_body(parts: &[Part]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File {
                filename,
                mime,
                bytes,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
                         Content-Type: {}\r\n\r\n",
                        filename, mime
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn multipart_request(
    uri: &str,
    auth: (header::HeaderName, String),
    parts: &[Part],
) -> actix_http::Request {
    test::TestRequest::post()
        .uri(uri)
        .insert_header(auth)
        .insert_header((
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        ))
        .set_payload(multipart_body(parts))
        .to_request()
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([30, 90, 200]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

fn on_disk(relative: &str) -> PathBuf {
    common::test_config().upload_dir.join(relative)
}

fn bearer(user_id: i32) -> (header::HeaderName, String) {
    let pair = generate_token_pair(user_id, &common::test_config().jwt).expect("token pair");
    (header::AUTHORIZATION, format!("Bearer {}", pair.access_token))
}

async fn call_json<S, B>(app: &S, req: actix_http::Request) -> (StatusCode, Value)
where
    S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let resp = test::call_service(app, req).await;
    let status = resp.status();
    let bytes = test::read_body(resp).await;
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn cleanup_uploads(pool: &sqlx::PgPool, users: &[&TestUser]) {
    for user in users {
        let _ = sqlx::query("DELETE FROM uploads WHERE user_id = $1")
            .bind(user.id)
            .execute(pool)
            .await;
    }
}

#[actix_rt::test]
#[ignore = "requires a running PostgreSQL at DATABASE_URL"]
async fn test_single_upload_rename_move_and_delete() {
    let pool = connect().await;
    let app = test::init_service(quillpost_app!(pool.clone())).await;
    let owner = register_user(&app, "uploader").await;
    let other = register_user(&app, "snooper").await;

    let png = png_bytes(400, 300);
    let req = multipart_request(
        "/api/uploads/single",
        owner.auth(),
        &[
            Part::Text("folder", "covers"),
            Part::Text("generateThumbnail", "true"),
            Part::File {
                filename: "Cover.PNG",
                mime: "image/png",
                bytes: &png,
            },
        ],
    );
    let (status, body) = call_json(&app, req).await;
    assert_eq!(status, StatusCode::CREATED, "upload failed: {}", body);
    let file = &body["file"];
    let upload_id = file["id"].as_i64().expect("upload id");
    let original_path = file["path"].as_str().expect("path").to_string();
    let original_filename = file["filename"].as_str().expect("filename").to_string();
    assert_eq!(file["originalName"], "Cover.PNG");
    assert_eq!(file["category"], "images");
    assert_eq!(file["userId"], owner.id);
    assert!(original_path.starts_with("images/covers/"));
    assert!(on_disk(&original_path).exists());
    assert!(file["thumbnailUrl"]
        .as_str()
        .expect("thumbnail url")
        .ends_with(&format!("thumb_{}", original_filename)));

    // Stored files are served back
    let req = test::TestRequest::get()
        .uri(&format!("/uploads/{}", original_path))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "image/png");

    // Records are public
    let upload_uri = format!("/api/uploads/{}", upload_id);
    let req = test::TestRequest::get().uri(&upload_uri).to_request();
    let (status, body) = call_json(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], original_path.as_str());

    // Only the owner may rename
    let req = test::TestRequest::patch()
        .uri(&upload_uri)
        .insert_header(other.auth())
        .set_json(json!({ "filename": "stolen" }))
        .to_request();
    let (status, body) = call_json(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "You can only modify your own files");

    // Rename keeps the extension and carries the thumbnail along
    let new_name = format!("renamed-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
    let req = test::TestRequest::patch()
        .uri(&upload_uri)
        .insert_header(owner.auth())
        .set_json(json!({ "filename": new_name }))
        .to_request();
    let (status, body) = call_json(&app, req).await;
    assert_eq!(status, StatusCode::OK, "rename failed: {}", body);
    let renamed_path = body["file"]["path"].as_str().expect("path").to_string();
    assert_eq!(body["file"]["filename"], format!("{}.png", new_name));
    assert!(renamed_path.ends_with(&format!("/{}.png", new_name)));
    assert!(on_disk(&renamed_path).exists());
    assert!(!on_disk(&original_path).exists());
    assert!(body["file"]["thumbnailUrl"]
        .as_str()
        .expect("thumbnail url")
        .ends_with(&format!("thumb_{}.png", new_name)));
    assert!(on_disk(&format!("thumbnails/thumb_{}.png", new_name)).exists());

    // Move to another folder of the same category
    let req = test::TestRequest::patch()
        .uri(&upload_uri)
        .insert_header(owner.auth())
        .set_json(json!({ "folder": "archive" }))
        .to_request();
    let (status, body) = call_json(&app, req).await;
    assert_eq!(status, StatusCode::OK, "move failed: {}", body);
    let moved_path = body["file"]["path"].as_str().expect("path").to_string();
    assert_eq!(moved_path, format!("images/archive/{}.png", new_name));
    assert!(on_disk(&moved_path).exists());
    assert!(!on_disk(&renamed_path).exists());

    // Delete: owner only, record and files go together
    let req = test::TestRequest::delete()
        .uri(&upload_uri)
        .insert_header(other.auth())
        .to_request();
    let (status, _) = call_json(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let req = test::TestRequest::delete()
        .uri(&upload_uri)
        .insert_header(owner.auth())
        .to_request();
    let (status, _) = call_json(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!on_disk(&moved_path).exists());
    assert!(!on_disk(&format!("thumbnails/thumb_{}.png", new_name)).exists());

    let req = test::TestRequest::get().uri(&upload_uri).to_request();
    let (status, _) = call_json(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    cleanup_uploads(&pool, &[&owner, &other]).await;
    cleanup_users(&pool, &[&owner, &other]).await;
}

#[actix_rt::test]
#[ignore = "requires a running PostgreSQL at DATABASE_URL"]
async fn test_multiple_upload_and_listing() {
    let pool = connect().await;
    let app = test::init_service(quillpost_app!(pool.clone())).await;
    let owner = register_user(&app, "batch").await;

    let png = png_bytes(32, 32);
    let req = multipart_request(
        "/api/uploads/multiple",
        owner.auth(),
        &[
            Part::File {
                filename: "notes.txt",
                mime: "text/plain",
                bytes: b"draft notes",
            },
            Part::File {
                filename: "icon.png",
                mime: "image/png",
                bytes: &png,
            },
        ],
    );
    let (status, body) = call_json(&app, req).await;
    assert_eq!(status, StatusCode::CREATED, "upload failed: {}", body);
    assert_eq!(body["count"], 2);
    let files = body["files"].as_array().expect("files");
    assert_eq!(files[0]["category"], "documents");
    assert_eq!(files[1]["category"], "images");
    assert!(files[1]["thumbnailUrl"].is_null());

    let req = test::TestRequest::get()
        .uri(&format!("/api/uploads?userId={}", owner.id))
        .to_request();
    let (status, body) = call_json(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);

    let req = test::TestRequest::get()
        .uri(&format!("/api/uploads?userId={}&category=images", owner.id))
        .to_request();
    let (_, body) = call_json(&app, req).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["uploads"][0]["originalName"], "icon.png");

    cleanup_uploads(&pool, &[&owner]).await;
    cleanup_users(&pool, &[&owner]).await;
}

#[actix_rt::test]
#[ignore = "requires a running PostgreSQL at DATABASE_URL"]
async fn test_profile_image_updates_user() {
    let pool = connect().await;
    let app = test::init_service(quillpost_app!(pool.clone())).await;
    let user = register_user(&app, "portrait").await;

    let png = png_bytes(128, 128);
    let req = multipart_request(
        &format!("/api/users/{}/profile-image", user.id),
        user.auth(),
        &[Part::File {
            filename: "me.png",
            mime: "image/png",
            bytes: &png,
        }],
    );
    let (status, body) = call_json(&app, req).await;
    assert_eq!(status, StatusCode::OK, "profile image failed: {}", body);
    assert_eq!(body["user"]["image"], body["file"]["url"]);
    assert_eq!(body["file"]["userId"], user.id);
    let path = body["file"]["path"].as_str().expect("path");
    assert!(path.starts_with("images/profile-pictures/"));
    assert!(on_disk(path).exists());

    let req = multipart_request(
        &format!("/api/users/{}/profile-image", user.id),
        user.auth(),
        &[Part::File {
            filename: "cv.txt",
            mime: "text/plain",
            bytes: b"not a picture",
        }],
    );
    let (status, body) = call_json(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Only image files are allowed for profile pictures");

    cleanup_uploads(&pool, &[&user]).await;
    cleanup_users(&pool, &[&user]).await;
}

#[actix_rt::test]
async fn test_rejected_forms_never_reach_storage() {
    let app = test::init_service(quillpost_app!(lazy_pool())).await;

    // Disallowed type
    let req = multipart_request(
        "/api/uploads/single",
        bearer(1),
        &[Part::File {
            filename: "setup.exe",
            mime: "application/x-msdownload",
            bytes: b"MZ",
        }],
    );
    let (status, body) = call_json(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"]
        .as_str()
        .expect("message")
        .starts_with("File type is not allowed"));

    // More files than allowed
    let parts: Vec<Part> = (0..11)
        .map(|_| Part::File {
            filename: "a.txt",
            mime: "text/plain",
            bytes: b"a",
        })
        .collect();
    let req = multipart_request("/api/uploads/multiple", bearer(1), &parts);
    let (status, body) = call_json(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Too many files uploaded at once");

    // No file part at all
    let req = multipart_request("/api/uploads/single", bearer(1), &[Part::Text("folder", "x")]);
    let (status, _) = call_json(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Someone else's profile
    let req = multipart_request(
        "/api/users/2/profile-image",
        bearer(1),
        &[Part::File {
            filename: "me.png",
            mime: "image/png",
            bytes: b"png",
        }],
    );
    let (status, _) = call_json(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[actix_rt::test]
async fn test_validate_reports_without_storing() {
    let app = test::init_service(quillpost_app!(lazy_pool())).await;

    let req = multipart_request(
        "/api/uploads/validate",
        bearer(1),
        &[Part::File {
            filename: "report.pdf",
            mime: "application/pdf",
            bytes: b"%PDF-1.4",
        }],
    );
    let (status, body) = call_json(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isValid"], true);
    assert_eq!(body["fileInfo"]["category"], "documents");
    assert_eq!(body["fileInfo"]["extension"], ".pdf");

    let req = multipart_request(
        "/api/uploads/validate",
        bearer(1),
        &[Part::File {
            filename: "blob.bin",
            mime: "application/octet-stream",
            bytes: b"\x00\x01",
        }],
    );
    let (status, body) = call_json(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isValid"], false);
    assert_eq!(body["errors"].as_array().expect("errors").len(), 2);
}
