use postwall_common::model::post::Post;
use postwall_db::client::{DbClient, DbError, FeedScope};
use serde::Deserialize;

pub const POSTS_PER_PAGE: u64 = 10;

/// The `?page=` query of a listing. Anything that is not an integer means the first page.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
pub struct PageQuery {
    page: Option<String>,
}

impl PageQuery {
    #[must_use]
    pub fn requested(&self) -> i64 {
        self.page
            .as_deref()
            .and_then(|page| page.trim().parse().ok())
            .unwrap_or(1)
    }
}

/// One page of a feed.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based.
    pub number: u64,
    pub num_pages: u64,
    pub total: u64,
}

impl<T> Page<T> {
    #[must_use]
    pub fn has_previous(&self) -> bool {
        self.number > 1
    }

    #[must_use]
    pub fn has_next(&self) -> bool {
        self.number < self.num_pages
    }

    #[must_use]
    pub fn previous_number(&self) -> u64 {
        self.number.saturating_sub(1).max(1)
    }

    #[must_use]
    pub fn next_number(&self) -> u64 {
        (self.number + 1).min(self.num_pages)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            number: self.number,
            num_pages: self.num_pages,
            total: self.total,
        }
    }
}

/// An empty feed still has one (empty) page.
#[must_use]
pub fn num_pages(total: u64, per_page: u64) -> u64 {
    total.div_ceil(per_page).max(1)
}

/// Out of range requests land on the last page.
#[must_use]
pub fn resolve_page_number(requested: i64, num_pages: u64) -> u64 {
    u64::try_from(requested)
        .ok()
        .filter(|number| (1..=num_pages).contains(number))
        .unwrap_or(num_pages)
}

/// Where a requested page lands in the feed as it currently is.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct PagePosition {
    pub number: u64,
    pub num_pages: u64,
    pub total: u64,
}

impl PagePosition {
    #[must_use]
    pub fn resolve(requested: i64, total: u64) -> Self {
        let num_pages = num_pages(total, POSTS_PER_PAGE);
        Self {
            number: resolve_page_number(requested, num_pages),
            num_pages,
            total,
        }
    }
}

pub async fn locate(
    db: &DbClient,
    scope: FeedScope,
    requested: i64,
) -> Result<PagePosition, DbError> {
    let total = db.count_posts(scope).await?;
    Ok(PagePosition::resolve(requested, total))
}

pub async fn fetch_page(
    db: &DbClient,
    scope: FeedScope,
    position: PagePosition,
) -> Result<Page<Post>, DbError> {
    let items = db
        .fetch_posts(scope, POSTS_PER_PAGE, (position.number - 1) * POSTS_PER_PAGE)
        .await?;

    Ok(Page {
        items,
        number: position.number,
        num_pages: position.num_pages,
        total: position.total,
    })
}

pub async fn paginate(
    db: &DbClient,
    scope: FeedScope,
    requested: i64,
) -> Result<Page<Post>, DbError> {
    let position = locate(db, scope, requested).await?;
    fetch_page(db, scope, position).await
}
