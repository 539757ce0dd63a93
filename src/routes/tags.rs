use crate::{
    auth::AuthenticatedUserId,
    error::AppError,
    models::{
        article::{ArticleRow, ARTICLE_SELECT},
        normalize_tag_name,
        pagination::{LimitQuery, SortOrder},
        tag::{
            TagList, TagQuery, TagSearchQuery, TagSortBy, TagStats, TagUsage, TagWithArticles,
            TaggedArticle,
        },
        MessageResponse, PageQuery, Tag, TagInput,
    },
    routes::ensure_article_exists,
};
use actix_web::{delete, get, patch, post, web, HttpResponse, Responder};
use serde_json::json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use validator::Validate;

const TAG_SELECT: &str = "SELECT t.id, t.name, COUNT(atg.article_id) AS article_count \
     FROM tags t LEFT JOIN article_tags atg ON atg.tag_id = t.id";
const TAG_GROUP: &str = " GROUP BY t.id, t.name";

/// Validates and normalizes a tag name from a create or rename request.
fn normalized_input(input: &TagInput) -> Result<String, AppError> {
    input.validate()?;
    let name = normalize_tag_name(&input.name);
    if name.is_empty() {
        return Err(AppError::BadRequest(
            "Tag name must contain letters, numbers, spaces or hyphens".into(),
        ));
    }
    Ok(name)
}

async fn fetch_tag(pool: &PgPool, tag_id: i32) -> Result<Tag, AppError> {
    sqlx::query_as::<_, Tag>(&format!("{} WHERE t.id = $1{}", TAG_SELECT, TAG_GROUP))
        .bind(tag_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Tag not found".into()))
}

async fn fetch_tag_by_name(pool: &PgPool, name: &str) -> Result<Tag, AppError> {
    sqlx::query_as::<_, Tag>(&format!("{} WHERE t.name = $1{}", TAG_SELECT, TAG_GROUP))
        .bind(normalize_tag_name(name))
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Tag not found".into()))
}

/// Create a tag
///
/// ## Responses:
/// - `201 Created`: `{ message, tag }`.
/// - `400 Bad Request`: the name normalizes to nothing.
/// - `409 Conflict`: a tag with the normalized name exists.
#[post("")]
pub async fn create_tag(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    input: web::Json<TagInput>,
) -> Result<impl Responder, AppError> {
    let name = normalized_input(&input)?;

    let tag_id: Option<i32> = sqlx::query_scalar(
        "INSERT INTO tags (name) VALUES ($1) ON CONFLICT (name) DO NOTHING RETURNING id",
    )
    .bind(&name)
    .fetch_optional(&**pool)
    .await?;
    let tag_id = tag_id.ok_or_else(|| AppError::Conflict("Tag already exists".into()))?;

    log::info!("User {} created tag '{}'", user.0, name);
    let tag = fetch_tag(&pool, tag_id).await?;
    Ok(HttpResponse::Created().json(json!({
        "message": "Tag created successfully",
        "tag": tag,
    })))
}

/// List tags
///
/// ## Query Parameters:
/// - `search`: substring of the name.
/// - `page`, `limit`, `sortBy` (`name|articleCount|createdAt`), `sortOrder`.
#[get("")]
pub async fn list_tags(
    pool: web::Data<PgPool>,
    query: web::Query<TagQuery>,
) -> Result<impl Responder, AppError> {
    let page = query.page_query().resolve();
    let search = query
        .search
        .as_deref()
        .map(normalize_tag_name)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s));

    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM tags t");
    let mut select = QueryBuilder::<Postgres>::new(TAG_SELECT);
    if let Some(pattern) = &search {
        count.push(" WHERE t.name ILIKE ").push_bind(pattern.clone());
        select.push(" WHERE t.name ILIKE ").push_bind(pattern.clone());
    }
    let total: i64 = count.build_query_scalar().fetch_one(&**pool).await?;

    let default_order = match query.sort_by.unwrap_or_default() {
        TagSortBy::Name => SortOrder::Asc,
        _ => SortOrder::Desc,
    };
    select
        .push(TAG_GROUP)
        .push(format!(
            " ORDER BY {} {}, t.id",
            query.sort_by.unwrap_or_default().column(),
            query.sort_order.unwrap_or(default_order).as_sql()
        ))
        .push(" LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());
    let tags = select.build_query_as::<Tag>().fetch_all(&**pool).await?;

    Ok(HttpResponse::Ok().json(TagList {
        tags,
        meta: page.meta(total),
    }))
}

#[get("/popular")]
pub async fn popular_tags(
    pool: web::Data<PgPool>,
    query: web::Query<LimitQuery>,
) -> Result<impl Responder, AppError> {
    let tags = sqlx::query_as::<_, Tag>(&format!(
        "{}{} ORDER BY article_count DESC, t.name ASC LIMIT $1",
        TAG_SELECT, TAG_GROUP
    ))
    .bind(query.resolve())
    .fetch_all(&**pool)
    .await?;
    Ok(HttpResponse::Ok().json(json!({ "tags": tags })))
}

/// `{ totalTags, mostUsedTags }`, the latter being the top ten by usage.
#[get("/stats")]
pub async fn tag_stats(pool: web::Data<PgPool>) -> Result<impl Responder, AppError> {
    let total_tags: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags")
        .fetch_one(&**pool)
        .await?;
    let most_used_tags = sqlx::query_as::<_, TagUsage>(
        "SELECT t.name, COUNT(atg.article_id) AS article_count \
         FROM tags t LEFT JOIN article_tags atg ON atg.tag_id = t.id \
         GROUP BY t.id, t.name ORDER BY article_count DESC, t.name ASC LIMIT 10",
    )
    .fetch_all(&**pool)
    .await?;

    Ok(HttpResponse::Ok().json(TagStats {
        total_tags,
        most_used_tags,
    }))
}

/// `?q=` prefix/substring search over normalized names.
#[get("/search")]
pub async fn search_tags(
    pool: web::Data<PgPool>,
    query: web::Query<TagSearchQuery>,
) -> Result<impl Responder, AppError> {
    let term = normalize_tag_name(&query.q);
    if term.is_empty() {
        return Err(AppError::BadRequest("Search query is required".into()));
    }
    let limit = LimitQuery { limit: query.limit }.resolve();

    let tags = sqlx::query_as::<_, Tag>(&format!(
        "{} WHERE t.name ILIKE $1{} ORDER BY article_count DESC, t.name ASC LIMIT $2",
        TAG_SELECT, TAG_GROUP
    ))
    .bind(format!("%{}%", term))
    .bind(limit)
    .fetch_all(&**pool)
    .await?;
    Ok(HttpResponse::Ok().json(json!({ "tags": tags })))
}

#[get("/article/{article_id}")]
pub async fn article_tags(
    pool: web::Data<PgPool>,
    path: web::Path<i32>,
) -> Result<impl Responder, AppError> {
    let article_id = path.into_inner();
    ensure_article_exists(&pool, article_id).await?;

    let tags = sqlx::query_as::<_, Tag>(&format!(
        "{} WHERE t.id IN (SELECT tag_id FROM article_tags WHERE article_id = $1){} \
         ORDER BY t.name",
        TAG_SELECT, TAG_GROUP
    ))
    .bind(article_id)
    .fetch_all(&**pool)
    .await?;
    Ok(HttpResponse::Ok().json(json!({ "tags": tags })))
}

/// Published articles carrying the tag, newest first.
#[get("/name/{name}/articles")]
pub async fn tag_articles(
    pool: web::Data<PgPool>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> Result<impl Responder, AppError> {
    let tag = fetch_tag_by_name(&pool, &path.into_inner()).await?;
    let page = query.resolve();

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM articles a JOIN article_tags atg ON atg.article_id = a.id \
         WHERE atg.tag_id = $1 AND a.published = TRUE",
    )
    .bind(tag.id)
    .fetch_one(&**pool)
    .await?;

    let rows = sqlx::query_as::<_, ArticleRow>(&format!(
        "{} JOIN article_tags atg ON atg.article_id = a.id \
         WHERE atg.tag_id = $1 AND a.published = TRUE \
         ORDER BY a.created_at DESC LIMIT $2 OFFSET $3",
        ARTICLE_SELECT
    ))
    .bind(tag.id)
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(&**pool)
    .await?;

    Ok(HttpResponse::Ok().json(TagWithArticles {
        id: tag.id,
        name: tag.name,
        articles: rows.into_iter().map(TaggedArticle::from).collect(),
        meta: page.meta(total),
    }))
}

#[get("/name/{name}")]
pub async fn tag_by_name(
    pool: web::Data<PgPool>,
    path: web::Path<String>,
) -> Result<impl Responder, AppError> {
    Ok(HttpResponse::Ok().json(fetch_tag_by_name(&pool, &path.into_inner()).await?))
}

#[get("/{id}")]
pub async fn get_tag(
    pool: web::Data<PgPool>,
    path: web::Path<i32>,
) -> Result<impl Responder, AppError> {
    Ok(HttpResponse::Ok().json(fetch_tag(&pool, path.into_inner()).await?))
}

/// Rename a tag. `409` when the normalized name belongs to another tag.
#[patch("/{id}")]
pub async fn update_tag(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    path: web::Path<i32>,
    input: web::Json<TagInput>,
) -> Result<impl Responder, AppError> {
    let tag_id = path.into_inner();
    let name = normalized_input(&input)?;
    let current = fetch_tag(&pool, tag_id).await?;

    if current.name != name {
        let holder: Option<i32> = sqlx::query_scalar("SELECT id FROM tags WHERE name = $1")
            .bind(&name)
            .fetch_optional(&**pool)
            .await?;
        if holder.is_some_and(|id| id != tag_id) {
            return Err(AppError::Conflict("Tag name already exists".into()));
        }

        sqlx::query("UPDATE tags SET name = $1 WHERE id = $2")
            .bind(&name)
            .bind(tag_id)
            .execute(&**pool)
            .await?;
        log::info!(
            "User {} renamed tag '{}' to '{}'",
            user.0,
            current.name,
            name
        );
    }

    let tag = fetch_tag(&pool, tag_id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": "Tag updated successfully",
        "tag": tag,
    })))
}

/// Delete a tag. Refused with `400` while any article still uses it.
#[delete("/{id}")]
pub async fn delete_tag(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    path: web::Path<i32>,
) -> Result<impl Responder, AppError> {
    let tag = fetch_tag(&pool, path.into_inner()).await?;
    if tag.article_count > 0 {
        return Err(AppError::BadRequest(format!(
            "Cannot delete tag \"{}\" because it is used by {} article(s)",
            tag.name, tag.article_count
        )));
    }

    sqlx::query("DELETE FROM tags WHERE id = $1")
        .bind(tag.id)
        .execute(&**pool)
        .await?;

    log::info!("User {} deleted tag '{}'", user.0, tag.name);
    Ok(HttpResponse::Ok().json(MessageResponse::new("Tag deleted successfully")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthMiddleware;
    use crate::routes::test_support::{bearer, test_app_data, test_config};
    use actix_web::{http::StatusCode, test as actix_test, App};

    #[test]
    fn test_normalized_input() {
        let input = TagInput {
            name: "  Web-Dev!! ".into(),
        };
        assert_eq!(normalized_input(&input).unwrap(), "web-dev");

        let symbols = TagInput { name: "!!!".into() };
        assert!(matches!(
            normalized_input(&symbols),
            Err(AppError::BadRequest(_))
        ));

        let empty = TagInput { name: String::new() };
        assert!(matches!(
            normalized_input(&empty),
            Err(AppError::ValidationError(_))
        ));
    }

    #[actix_rt::test]
    async fn test_tag_writes_require_authentication() {
        let app = actix_test::init_service(
            test_app_data(App::new()).service(
                web::scope("/tags")
                    .service(create_tag)
                    .service(update_tag)
                    .service(delete_tag),
            ),
        )
        .await;

        let requests = [
            actix_test::TestRequest::post()
                .uri("/tags")
                .set_json(json!({ "name": "rust" })),
            actix_test::TestRequest::patch()
                .uri("/tags/1")
                .set_json(json!({ "name": "rustlang" })),
            actix_test::TestRequest::delete().uri("/tags/1"),
        ];
        for req in requests {
            let resp = actix_test::call_service(&app, req.to_request()).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[actix_rt::test]
    async fn test_create_rejects_unnormalizable_name() {
        let app = actix_test::init_service(
            test_app_data(App::new())
                .wrap(AuthMiddleware::new(test_config().jwt))
                .service(web::scope("/tags").service(create_tag).service(search_tags)),
        )
        .await;

        let req = actix_test::TestRequest::post()
            .uri("/tags")
            .insert_header(bearer(2))
            .set_json(json!({ "name": "???" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = actix_test::TestRequest::get().uri("/tags/search?q=%21%21").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
