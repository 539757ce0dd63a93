use crate::{
    auth::AuthenticatedUserId,
    error::AppError,
    models::{
        comment::{CommentListQuery, CommentRow, COMMENT_SELECT},
        Comment, CommentList, CreateCommentInput, MessageResponse, PageQuery, UpdateCommentInput,
    },
    routes::{ensure_article_exists, ensure_user_exists},
};
use actix_web::{delete, get, patch, post, web, HttpResponse, Responder};
use serde_json::json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use validator::Validate;

async fn fetch_comment(pool: &PgPool, comment_id: i32) -> Result<Comment, AppError> {
    let row = sqlx::query_as::<_, CommentRow>(&format!("{} WHERE c.id = $1", COMMENT_SELECT))
        .bind(comment_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Comment not found".into()))?;
    Ok(row.into())
}

/// Pages through comments, newest first. `filter` restricts one column to
/// an id; `None` lists every comment.
async fn list_comments_where(
    pool: &PgPool,
    filter: Option<(&str, i32)>,
    page: PageQuery,
) -> Result<CommentList, AppError> {
    let page = page.resolve();

    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM comments c");
    let mut select = QueryBuilder::<Postgres>::new(COMMENT_SELECT);
    if let Some((column, id)) = filter {
        count.push(format!(" WHERE {} = ", column)).push_bind(id);
        select.push(format!(" WHERE {} = ", column)).push_bind(id);
    }
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    select
        .push(" ORDER BY c.created_at DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());
    let rows = select.build_query_as::<CommentRow>().fetch_all(pool).await?;

    Ok(CommentList {
        comments: rows.into_iter().map(Comment::from).collect(),
        meta: page.meta(total),
    })
}

async fn ensure_comment_owner(
    pool: &PgPool,
    comment_id: i32,
    user_id: i32,
    action: &str,
) -> Result<(), AppError> {
    let author_id: Option<i32> = sqlx::query_scalar("SELECT author_id FROM comments WHERE id = $1")
        .bind(comment_id)
        .fetch_optional(pool)
        .await?;
    match author_id {
        None => Err(AppError::NotFound("Comment not found".into())),
        Some(author_id) if author_id != user_id => Err(AppError::Forbidden(format!(
            "You can only {} your own comments",
            action
        ))),
        Some(_) => Ok(()),
    }
}

/// Comment on an article
///
/// ## Responses:
/// - `201 Created`: `{ message, comment }`.
/// - `404 Not Found`: the article does not exist.
/// - `422 Unprocessable Entity`: empty body.
#[post("")]
pub async fn create_comment(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    input: web::Json<CreateCommentInput>,
) -> Result<impl Responder, AppError> {
    input.validate()?;
    ensure_article_exists(&pool, input.article_id).await?;

    let comment_id: i32 = sqlx::query_scalar(
        "INSERT INTO comments (body, article_id, author_id) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(&input.body)
    .bind(input.article_id)
    .bind(user.0)
    .fetch_one(&**pool)
    .await?;

    let comment = fetch_comment(&pool, comment_id).await?;
    Ok(HttpResponse::Created().json(json!({
        "message": "Comment created successfully",
        "comment": comment,
    })))
}

/// Every comment, or only those on `?articleId=`.
#[get("")]
pub async fn list_comments(
    pool: web::Data<PgPool>,
    query: web::Query<CommentListQuery>,
) -> Result<impl Responder, AppError> {
    let page = PageQuery {
        page: query.page,
        limit: query.limit,
    };
    let filter = query.article_id.map(|id| ("c.article_id", id));
    Ok(HttpResponse::Ok().json(list_comments_where(&pool, filter, page).await?))
}

#[get("/article/{article_id}")]
pub async fn comments_by_article(
    pool: web::Data<PgPool>,
    path: web::Path<i32>,
    query: web::Query<PageQuery>,
) -> Result<impl Responder, AppError> {
    let article_id = path.into_inner();
    ensure_article_exists(&pool, article_id).await?;
    let list = list_comments_where(&pool, Some(("c.article_id", article_id)), *query).await?;
    Ok(HttpResponse::Ok().json(list))
}

#[get("/user/{user_id}")]
pub async fn comments_by_user(
    pool: web::Data<PgPool>,
    path: web::Path<i32>,
    query: web::Query<PageQuery>,
) -> Result<impl Responder, AppError> {
    let user_id = path.into_inner();
    ensure_user_exists(&pool, user_id).await?;
    let list = list_comments_where(&pool, Some(("c.author_id", user_id)), *query).await?;
    Ok(HttpResponse::Ok().json(list))
}

#[get("/count/{article_id}")]
pub async fn comment_count(
    pool: web::Data<PgPool>,
    path: web::Path<i32>,
) -> Result<impl Responder, AppError> {
    let article_id = path.into_inner();
    ensure_article_exists(&pool, article_id).await?;
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE article_id = $1")
        .bind(article_id)
        .fetch_one(&**pool)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "count": count })))
}

#[get("/{id}")]
pub async fn get_comment(
    pool: web::Data<PgPool>,
    path: web::Path<i32>,
) -> Result<impl Responder, AppError> {
    Ok(HttpResponse::Ok().json(fetch_comment(&pool, path.into_inner()).await?))
}

#[patch("/{id}")]
pub async fn update_comment(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    path: web::Path<i32>,
    input: web::Json<UpdateCommentInput>,
) -> Result<impl Responder, AppError> {
    input.validate()?;
    let comment_id = path.into_inner();
    ensure_comment_owner(&pool, comment_id, user.0, "edit").await?;

    sqlx::query("UPDATE comments SET body = $1, updated_at = NOW() WHERE id = $2")
        .bind(&input.body)
        .bind(comment_id)
        .execute(&**pool)
        .await?;

    let comment = fetch_comment(&pool, comment_id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": "Comment updated successfully",
        "comment": comment,
    })))
}

#[delete("/{id}")]
pub async fn delete_comment(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    path: web::Path<i32>,
) -> Result<impl Responder, AppError> {
    let comment_id = path.into_inner();
    ensure_comment_owner(&pool, comment_id, user.0, "delete").await?;

    sqlx::query("DELETE FROM comments WHERE id = $1")
        .bind(comment_id)
        .execute(&**pool)
        .await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new("Comment deleted successfully")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthMiddleware;
    use crate::routes::test_support::{bearer, test_app_data, test_config};
    use actix_web::{http::StatusCode, test, App};

    #[actix_rt::test]
    async fn test_comment_writes_require_authentication() {
        let app = test::init_service(
            test_app_data(App::new()).service(
                web::scope("/comments")
                    .service(create_comment)
                    .service(update_comment)
                    .service(delete_comment),
            ),
        )
        .await;

        let requests = [
            test::TestRequest::post()
                .uri("/comments")
                .set_json(json!({ "articleId": 1, "body": "Nice" })),
            test::TestRequest::patch()
                .uri("/comments/1")
                .set_json(json!({ "body": "Edited" })),
            test::TestRequest::delete().uri("/comments/1"),
        ];
        for req in requests {
            let resp = test::call_service(&app, req.to_request()).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[actix_rt::test]
    async fn test_empty_comment_is_rejected() {
        let app = test::init_service(
            test_app_data(App::new())
                .wrap(AuthMiddleware::new(test_config().jwt))
                .service(web::scope("/comments").service(create_comment)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/comments")
            .insert_header(bearer(4))
            .set_json(json!({ "articleId": 1, "body": "" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
