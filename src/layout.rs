//! Single- vs double-page layout decisions.
//!
//! Pages are paired only when both are known to be portrait. An unknown aspect
//! ratio always means single-page until the image has been decoded.

use crate::domain::PageMode;

fn is_portrait(aspect_ratio: Option<f32>) -> bool {
    matches!(aspect_ratio, Some(ratio) if ratio <= 1.0)
}

/// Whether `current_page` and the page after it are shown side by side.
pub fn should_show_double_page(
    mode: PageMode,
    current_page: u32,
    page_count: u32,
    current_ratio: Option<f32>,
    next_ratio: Option<f32>,
) -> bool {
    if mode == PageMode::Single {
        return false;
    }
    // never at the extremities of a volume
    if current_page <= 1 || current_page >= page_count {
        return false;
    }
    let pair = is_portrait(current_ratio) && is_portrait(next_ratio);
    tracing::debug!(
        "Page {}: ratios {:?}/{:?}, double = {}",
        current_page,
        current_ratio,
        next_ratio,
        pair
    );
    pair
}

/// Whether stepping back from `current_page` skips over a spread of two pages.
pub fn should_step_back_double(
    mode: PageMode,
    current_page: u32,
    prev_ratio: Option<f32>,
    prev_prev_ratio: Option<f32>,
) -> bool {
    if mode == PageMode::Single || current_page <= 2 {
        return false;
    }
    is_portrait(prev_ratio) && is_portrait(prev_prev_ratio)
}

/// Page reached by turning forward, or `None` at the last page.
pub fn next_page(
    mode: PageMode,
    current_page: u32,
    page_count: u32,
    ratio_of: impl Fn(u32) -> Option<f32>,
) -> Option<u32> {
    let last = page_count.max(1);
    if current_page >= last {
        return None;
    }
    let double = should_show_double_page(
        mode,
        current_page,
        page_count,
        ratio_of(current_page),
        ratio_of(current_page + 1),
    );
    let step = if double { 2 } else { 1 };
    Some((current_page + step).min(last))
}

/// Page reached by turning backward, or `None` at the first page.
pub fn previous_page(
    mode: PageMode,
    current_page: u32,
    ratio_of: impl Fn(u32) -> Option<f32>,
) -> Option<u32> {
    if current_page <= 1 {
        return None;
    }
    let double = current_page > 2
        && should_step_back_double(
            mode,
            current_page,
            ratio_of(current_page - 1),
            ratio_of(current_page - 2),
        );
    let step = if double { 2 } else { 1 };
    Some(current_page.saturating_sub(step).max(1))
}
