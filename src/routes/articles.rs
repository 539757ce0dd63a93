use crate::{
    auth::{AuthenticatedUserId, OptionalUserId},
    error::AppError,
    models::{
        article::{ArticleRow, ArticleStats, TagRef, ARTICLE_SELECT},
        pagination::{LimitQuery, SortOrder},
        tag::article_tag_names,
        Article, ArticleList, ArticleQuery, CreateArticleInput, MessageResponse, PageQuery,
        UpdateArticleInput,
    },
    routes::ensure_user_exists,
    slug::{generate_slug, unique_article_slug},
};
use actix_web::{delete, get, patch, post, web, HttpResponse, Responder};
use serde_json::json;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::{HashMap, HashSet};
use validator::Validate;

const COUNT_FROM: &str = "SELECT COUNT(*) FROM articles a JOIN users u ON u.id = a.author_id";

/// Drafts are only visible to their author.
fn push_visibility<'a>(builder: &mut QueryBuilder<'a, Postgres>, viewer: Option<i32>) {
    match viewer {
        Some(user_id) => {
            builder
                .push(" WHERE (a.published = TRUE OR a.author_id = ")
                .push_bind(user_id)
                .push(")");
        }
        None => {
            builder.push(" WHERE a.published = TRUE");
        }
    }
}

fn push_filters<'a>(builder: &mut QueryBuilder<'a, Postgres>, query: &ArticleQuery) {
    if let Some(published) = query.published {
        builder.push(" AND a.published = ").push_bind(published);
    }
    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = format!("%{}%", search.trim());
        builder
            .push(" AND (a.title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR a.description ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR a.body ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(author) = query.author.as_deref().filter(|s| !s.trim().is_empty()) {
        builder
            .push(" AND u.username ILIKE ")
            .push_bind(format!("%{}%", author.trim()));
    }
    if let Some(tag) = query.tag.as_deref().filter(|s| !s.trim().is_empty()) {
        builder
            .push(
                " AND EXISTS (SELECT 1 FROM article_tags atg JOIN tags t ON t.id = atg.tag_id \
                 WHERE atg.article_id = a.id AND t.name ILIKE ",
            )
            .push_bind(format!("%{}%", tag.trim()))
            .push(")");
    }
}

/// Attaches tags and the viewer's like flag to a page of rows, in two queries.
pub(crate) async fn hydrate_articles(
    pool: &PgPool,
    rows: Vec<ArticleRow>,
    viewer: Option<i32>,
) -> Result<Vec<Article>, AppError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<i32> = rows.iter().map(|row| row.id).collect();

    let tag_rows: Vec<(i32, i32, String)> = sqlx::query_as(
        "SELECT atg.article_id, t.id, t.name FROM article_tags atg \
         JOIN tags t ON t.id = atg.tag_id \
         WHERE atg.article_id = ANY($1) ORDER BY t.name",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await?;
    let mut tags: HashMap<i32, Vec<TagRef>> = HashMap::new();
    for (article_id, id, name) in tag_rows {
        tags.entry(article_id).or_default().push(TagRef { id, name });
    }

    let liked: HashSet<i32> = match viewer {
        Some(user_id) => sqlx::query_scalar::<_, i32>(
            "SELECT article_id FROM likes WHERE user_id = $1 AND article_id = ANY($2)",
        )
        .bind(user_id)
        .bind(&ids)
        .fetch_all(pool)
        .await?
        .into_iter()
        .collect(),
        None => HashSet::new(),
    };

    Ok(rows
        .into_iter()
        .map(|row| {
            let id = row.id;
            Article::from_row(row, tags.remove(&id).unwrap_or_default(), liked.contains(&id))
        })
        .collect())
}

async fn fetch_visible<F>(pool: &PgPool, viewer: Option<i32>, key: F) -> Result<Article, AppError>
where
    F: FnOnce(&mut QueryBuilder<'_, Postgres>),
{
    let mut builder = QueryBuilder::<Postgres>::new(ARTICLE_SELECT);
    push_visibility(&mut builder, viewer);
    key(&mut builder);

    let row = builder
        .build_query_as::<ArticleRow>()
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Article not found".into()))?;

    hydrate_articles(pool, vec![row], viewer)
        .await?
        .pop()
        .ok_or_else(|| AppError::NotFound("Article not found".into()))
}

pub(crate) async fn fetch_article(
    pool: &PgPool,
    article_id: i32,
    viewer: Option<i32>,
) -> Result<Article, AppError> {
    fetch_visible(pool, viewer, |builder| {
        builder.push(" AND a.id = ").push_bind(article_id);
    })
    .await
}

/// Replaces the article's tag set with `names`, already normalized by
/// `article_tag_names`, creating tags that do not exist yet.
async fn set_article_tags(
    tx: &mut Transaction<'_, Postgres>,
    article_id: i32,
    names: &[String],
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM article_tags WHERE article_id = $1")
        .bind(article_id)
        .execute(&mut **tx)
        .await?;

    for name in names {
        let tag_id: i32 = sqlx::query_scalar(
            "INSERT INTO tags (name) VALUES ($1) \
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name RETURNING id",
        )
        .bind(name)
        .fetch_one(&mut **tx)
        .await?;

        sqlx::query(
            "INSERT INTO article_tags (article_id, tag_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(article_id)
        .bind(tag_id)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn slug_for(title: &str) -> Result<String, AppError> {
    let slug = generate_slug(title);
    if slug.is_empty() {
        return Err(AppError::BadRequest(
            "Title must contain at least one letter or number".into(),
        ));
    }
    Ok(slug)
}

/// Runs the count and page queries for a filtered article list.
async fn list_page<F>(
    pool: &PgPool,
    viewer: Option<i32>,
    page: PageQuery,
    order: &str,
    filter: F,
) -> Result<ArticleList, AppError>
where
    F: Fn(&mut QueryBuilder<'_, Postgres>),
{
    let page = page.resolve();

    let mut count = QueryBuilder::<Postgres>::new(COUNT_FROM);
    push_visibility(&mut count, viewer);
    filter(&mut count);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::<Postgres>::new(ARTICLE_SELECT);
    push_visibility(&mut select, viewer);
    filter(&mut select);
    select
        .push(format!(" ORDER BY {}", order))
        .push(" LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());
    let rows = select.build_query_as::<ArticleRow>().fetch_all(pool).await?;

    Ok(ArticleList {
        articles: hydrate_articles(pool, rows, viewer).await?,
        meta: page.meta(total),
    })
}

/// Create an article
///
/// The slug is derived from the title and made unique; tags are normalized
/// and created on demand.
///
/// ## Responses:
/// - `201 Created`: `{ message, article }`.
/// - `400 Bad Request`: the title has no letters or digits, or a tag is too long.
/// - `401 Unauthorized`: no valid token.
/// - `422 Unprocessable Entity`: empty title or body.
#[post("")]
pub async fn create_article(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    input: web::Json<CreateArticleInput>,
) -> Result<impl Responder, AppError> {
    input.validate()?;
    let CreateArticleInput {
        title,
        description,
        body,
        published,
        tags,
    } = input.into_inner();
    let tags = tags.as_deref().map(article_tag_names).transpose()?;

    let slug = unique_article_slug(&pool, &slug_for(&title)?, None).await?;

    let mut tx = pool.begin().await?;
    let article_id: i32 = sqlx::query_scalar(
        "INSERT INTO articles (title, slug, description, body, published, author_id) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
    )
    .bind(&title)
    .bind(&slug)
    .bind(&description)
    .bind(&body)
    .bind(published.unwrap_or(false))
    .bind(user.0)
    .fetch_one(&mut *tx)
    .await?;
    if let Some(tags) = tags {
        set_article_tags(&mut tx, article_id, &tags).await?;
    }
    tx.commit().await?;

    log::info!("User {} created article {} ({})", user.0, article_id, slug);
    let article = fetch_article(&pool, article_id, Some(user.0)).await?;
    Ok(HttpResponse::Created().json(json!({
        "message": "Article created successfully",
        "article": article,
    })))
}

/// List articles
///
/// ## Query Parameters:
/// - `search`: matches title, description or body (case-insensitive).
/// - `author`: matches the author's username.
/// - `tag`: matches any tag name.
/// - `published`: `true` or `false`.
/// - `page`, `limit`, `sortBy` (`createdAt|updatedAt|title`), `sortOrder` (`asc|desc`).
#[get("")]
pub async fn list_articles(
    pool: web::Data<PgPool>,
    viewer: OptionalUserId,
    query: web::Query<ArticleQuery>,
) -> Result<impl Responder, AppError> {
    let order = format!(
        "{} {}",
        query.sort_by.unwrap_or_default().column(),
        query.sort_order.unwrap_or(SortOrder::Desc).as_sql()
    );
    let list = list_page(&pool, viewer.0, query.page_query(), &order, |builder| {
        push_filters(builder, &query)
    })
    .await?;
    Ok(HttpResponse::Ok().json(list))
}

/// Published articles ranked by likes, then comments, then recency.
#[get("/popular")]
pub async fn popular_articles(
    pool: web::Data<PgPool>,
    viewer: OptionalUserId,
    query: web::Query<LimitQuery>,
) -> Result<impl Responder, AppError> {
    let rows = sqlx::query_as::<_, ArticleRow>(&format!(
        "{} WHERE a.published = TRUE \
         ORDER BY likes_count DESC, comments_count DESC, a.created_at DESC LIMIT $1",
        ARTICLE_SELECT
    ))
    .bind(query.resolve())
    .fetch_all(&**pool)
    .await?;

    let articles = hydrate_articles(&pool, rows, viewer.0).await?;
    Ok(HttpResponse::Ok().json(json!({ "articles": articles })))
}

/// The caller's article counts.
#[get("/stats")]
pub async fn article_stats(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
) -> Result<impl Responder, AppError> {
    let (total, published): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE published) FROM articles WHERE author_id = $1",
    )
    .bind(user.0)
    .fetch_one(&**pool)
    .await?;

    Ok(HttpResponse::Ok().json(ArticleStats {
        total_articles: total,
        published_articles: published,
        draft_articles: total - published,
    }))
}

/// The caller's articles, drafts included.
#[get("/my-articles")]
pub async fn my_articles(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    query: web::Query<PageQuery>,
) -> Result<impl Responder, AppError> {
    let list = list_page(&pool, Some(user.0), *query, "a.created_at DESC", |builder| {
        builder.push(" AND a.author_id = ").push_bind(user.0);
    })
    .await?;
    Ok(HttpResponse::Ok().json(list))
}

#[get("/author/{author_id}")]
pub async fn articles_by_author(
    pool: web::Data<PgPool>,
    viewer: OptionalUserId,
    path: web::Path<i32>,
    query: web::Query<PageQuery>,
) -> Result<impl Responder, AppError> {
    let author_id = path.into_inner();
    ensure_user_exists(&pool, author_id).await?;

    let list = list_page(&pool, viewer.0, *query, "a.created_at DESC", |builder| {
        builder.push(" AND a.author_id = ").push_bind(author_id);
    })
    .await?;
    Ok(HttpResponse::Ok().json(list))
}

#[get("/slug/{slug}")]
pub async fn article_by_slug(
    pool: web::Data<PgPool>,
    viewer: OptionalUserId,
    path: web::Path<String>,
) -> Result<impl Responder, AppError> {
    let slug = path.into_inner();
    let article = fetch_visible(&pool, viewer.0, |builder| {
        builder.push(" AND a.slug = ").push_bind(slug);
    })
    .await?;
    Ok(HttpResponse::Ok().json(article))
}

#[get("/{id}")]
pub async fn get_article(
    pool: web::Data<PgPool>,
    viewer: OptionalUserId,
    path: web::Path<i32>,
) -> Result<impl Responder, AppError> {
    let article = fetch_article(&pool, path.into_inner(), viewer.0).await?;
    Ok(HttpResponse::Ok().json(article))
}

async fn owned_article_title(
    pool: &PgPool,
    article_id: i32,
    user_id: i32,
    action: &str,
) -> Result<String, AppError> {
    let found: Option<(i32, String)> =
        sqlx::query_as("SELECT author_id, title FROM articles WHERE id = $1")
            .bind(article_id)
            .fetch_optional(pool)
            .await?;
    let (author_id, title) = found.ok_or_else(|| AppError::NotFound("Article not found".into()))?;
    if author_id != user_id {
        log::warn!(
            "User {} tried to {} article {} owned by {}",
            user_id,
            action,
            article_id,
            author_id
        );
        return Err(AppError::Forbidden(format!(
            "You can only {} your own articles",
            action
        )));
    }
    Ok(title)
}

/// Update an article
///
/// Only the author may update. The slug is regenerated only when the title
/// actually changes. A `tags` array replaces the whole tag set.
#[patch("/{id}")]
pub async fn update_article(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    path: web::Path<i32>,
    input: web::Json<UpdateArticleInput>,
) -> Result<impl Responder, AppError> {
    input.validate()?;
    let article_id = path.into_inner();
    let current_title = owned_article_title(&pool, article_id, user.0, "edit").await?;

    let UpdateArticleInput {
        title,
        description,
        body,
        published,
        tags,
    } = input.into_inner();
    let tags = tags.as_deref().map(article_tag_names).transpose()?;

    let slug = match title.as_deref() {
        Some(new_title) if new_title != current_title => {
            Some(unique_article_slug(&pool, &slug_for(new_title)?, Some(article_id)).await?)
        }
        _ => None,
    };

    let mut tx = pool.begin().await?;
    sqlx::query(
        "UPDATE articles SET title = COALESCE($1, title), slug = COALESCE($2, slug), \
         description = COALESCE($3, description), body = COALESCE($4, body), \
         published = COALESCE($5, published), updated_at = NOW() WHERE id = $6",
    )
    .bind(&title)
    .bind(&slug)
    .bind(&description)
    .bind(&body)
    .bind(published)
    .bind(article_id)
    .execute(&mut *tx)
    .await?;
    if let Some(tags) = tags {
        set_article_tags(&mut tx, article_id, &tags).await?;
    }
    tx.commit().await?;

    let article = fetch_article(&pool, article_id, Some(user.0)).await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": "Article updated successfully",
        "article": article,
    })))
}

/// Delete an article. Comments, likes and tag links go with it.
#[delete("/{id}")]
pub async fn delete_article(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    path: web::Path<i32>,
) -> Result<impl Responder, AppError> {
    let article_id = path.into_inner();
    owned_article_title(&pool, article_id, user.0, "delete").await?;

    sqlx::query("DELETE FROM articles WHERE id = $1")
        .bind(article_id)
        .execute(&**pool)
        .await?;

    log::info!("User {} deleted article {}", user.0, article_id);
    Ok(HttpResponse::Ok().json(MessageResponse::new("Article deleted successfully")))
}
