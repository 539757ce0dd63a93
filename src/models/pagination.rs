use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

/// `?page=&limit=` as accepted by every list endpoint.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// A page request after clamping: `page >= 1`, `1 <= limit <= 100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub limit: i64,
}

impl PageQuery {
    pub fn resolve(&self) -> Page {
        Page {
            page: self.page.unwrap_or(1).max(1),
            limit: self
                .limit
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }
}

impl Page {
    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }

    pub fn meta(&self, total: i64) -> PageMeta {
        PageMeta {
            total,
            page: self.page,
            limit: self.limit,
            total_pages: (total + self.limit - 1) / self.limit,
        }
    }
}

/// Paging information flattened into every list response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

/// `?limit=` for the "top N" endpoints (popular articles, popular tags, search).
#[derive(Debug, Default, Clone, Copy, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

impl LimitQuery {
    pub fn resolve(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }
}

/// Sort direction accepted as `asc` / `desc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_defaults_and_clamping() {
        assert_eq!(PageQuery::default().resolve(), Page { page: 1, limit: 10 });

        let page = PageQuery {
            page: Some(0),
            limit: Some(1000),
        }
        .resolve();
        assert_eq!(page, Page { page: 1, limit: 100 });

        let page = PageQuery {
            page: Some(3),
            limit: Some(-5),
        }
        .resolve();
        assert_eq!(page, Page { page: 3, limit: 1 });
        assert_eq!(page.offset(), 2);
    }

    #[test]
    fn test_page_meta_total_pages() {
        let page = Page { page: 2, limit: 10 };
        assert_eq!(page.meta(0).total_pages, 0);
        assert_eq!(page.meta(10).total_pages, 1);
        assert_eq!(page.meta(11).total_pages, 2);
        assert_eq!(page.offset(), 10);
    }

    #[test]
    fn test_meta_serializes_camel_case() {
        let json = serde_json::to_value(Page { page: 1, limit: 5 }.meta(12)).unwrap();
        assert_eq!(json["totalPages"], 3);
    }
}
