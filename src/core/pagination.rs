use serde::Serialize;

/// One page of an ordered result set.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: usize,
    pub num_pages: usize,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn has_previous(&self) -> bool {
        self.number > 1
    }

    pub fn has_next(&self) -> bool {
        self.number < self.num_pages
    }
}

/// Resolves a raw `page` value against `total` items.
///
/// Missing or non-numeric values give page 1; numbers outside the valid
/// range give the last page. There is always at least one page.
pub fn resolve_page_number(raw: Option<&str>, total: usize, per_page: usize) -> usize {
    let num_pages = num_pages(total, per_page);
    match raw.map(str::trim).and_then(|r| r.parse::<i64>().ok()) {
        None => 1,
        Some(n) if n < 1 || n as usize > num_pages => num_pages,
        Some(n) => n as usize,
    }
}

pub fn num_pages(total: usize, per_page: usize) -> usize {
    total.div_ceil(per_page.max(1)).max(1)
}

pub fn paginate<T>(items: Vec<T>, raw_page: Option<&str>, per_page: usize) -> Page<T> {
    let total = items.len();
    let number = resolve_page_number(raw_page, total, per_page);
    let items = items
        .into_iter()
        .skip((number - 1) * per_page)
        .take(per_page)
        .collect();

    Page {
        items,
        number,
        num_pages: num_pages(total, per_page),
        total,
    }
}
