// ABOUTME: Drives paginated find and list calls against the Data API
// ABOUTME: OR-branch payloads fetch concurrently and de-duplicate on record id

use std::collections::HashSet;

use futures::future::try_join_all;

use crate::error::{ExtractError, Result};
use crate::filemaker::{DataInfo, DataSource, FindPayload, Page, RawRecord};
use crate::query::FindPlan;

/// All records selected by a plan, in branch order, de-duplicated.
#[derive(Debug, Default)]
pub struct FetchResult {
    pub records: Vec<RawRecord>,
    /// Data info from the first page seen; carries the output table name.
    pub info: DataInfo,
}

/// Cursor over one payload's pages. Offsets are 1-based, matching the API;
/// a page shorter than the page size is the last one.
struct PageCursor {
    payload_index: usize,
    offset: u32,
    exhausted: bool,
}

impl PageCursor {
    fn new(payload_index: usize) -> Self {
        Self {
            payload_index,
            offset: 1,
            exhausted: false,
        }
    }
}

pub struct Pager<'a, D: DataSource> {
    source: &'a D,
    database: &'a str,
    layout: &'a str,
    page_size: u32,
}

impl<'a, D: DataSource> Pager<'a, D> {
    pub fn new(source: &'a D, database: &'a str, layout: &'a str, page_size: u32) -> Self {
        Self {
            source,
            database,
            layout,
            page_size,
        }
    }

    /// Fetches every record selected by the plan.
    ///
    /// Find payloads (OR-branches) are independent queries and fetch
    /// concurrently; a record satisfying more than one branch appears once in
    /// the result, keyed by its native record id. Output order across
    /// branches is therefore not meaningful to callers.
    pub async fn fetch_plan(&self, plan: &FindPlan) -> Result<FetchResult> {
        let pages = match plan {
            FindPlan::ListAll => self.fetch_list().await?,
            FindPlan::Find(payloads) => {
                let branches = payloads
                    .iter()
                    .enumerate()
                    .map(|(index, payload)| self.fetch_payload(index, payload));
                let mut pages = Vec::new();
                for branch in try_join_all(branches).await? {
                    pages.extend(branch);
                }
                pages
            }
        };

        let mut seen = HashSet::new();
        let mut result = FetchResult::default();
        let mut have_info = false;
        for page in pages {
            if !have_info {
                result.info = page.info;
                have_info = true;
            }
            for record in page.records {
                if record.record_id.is_empty() || seen.insert(record.record_id.clone()) {
                    result.records.push(record);
                }
            }
        }
        Ok(result)
    }

    /// Pages through one find payload until exhaustion.
    async fn fetch_payload(&self, payload_index: usize, payload: &FindPayload) -> Result<Vec<Page>> {
        let mut cursor = PageCursor::new(payload_index);
        let mut pages = Vec::new();
        while let Some(page) = self.next_find_page(&mut cursor, payload).await? {
            pages.push(page);
        }
        Ok(pages)
    }

    async fn next_find_page(
        &self,
        cursor: &mut PageCursor,
        payload: &FindPayload,
    ) -> Result<Option<Page>> {
        if cursor.exhausted {
            return Ok(None);
        }
        let page = self
            .source
            .find(self.database, self.layout, payload, cursor.offset, self.page_size)
            .await
            .map_err(|source| ExtractError::Fetch {
                payload_index: cursor.payload_index,
                offset: cursor.offset,
                source,
            })?;
        Ok(Some(self.advance_cursor(cursor, page)))
    }

    async fn fetch_list(&self) -> Result<Vec<Page>> {
        let mut cursor = PageCursor::new(0);
        let mut pages = Vec::new();
        loop {
            if cursor.exhausted {
                return Ok(pages);
            }
            let page = self
                .source
                .list_records(self.database, self.layout, cursor.offset, self.page_size)
                .await
                .map_err(|source| ExtractError::Fetch {
                    payload_index: cursor.payload_index,
                    offset: cursor.offset,
                    source,
                })?;
            pages.push(self.advance_cursor(&mut cursor, page));
        }
    }

    fn advance_cursor(&self, cursor: &mut PageCursor, page: Page) -> Page {
        let returned = page.records.len() as u32;
        if returned > 0 {
            tracing::info!(
                "Downloading records {} - {}",
                cursor.offset,
                cursor.offset + returned - 1
            );
        }
        if returned < self.page_size {
            cursor.exhausted = true;
        } else {
            cursor.offset += self.page_size;
        }
        page
    }
}
