use futures::future::join_all;

use crate::app::{AppContext, OpdsError, Result};
use crate::domain::{Entry, PageMode, ReaderState};
use crate::navigation::url::page_url;
use crate::navigation::{classify, LinkAction, Screen};

/// Options of the `read` command.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub url: String,
    pub entry: usize,
    pub page: Option<u32>,
    pub resume: bool,
    pub turns: u32,
    pub double: bool,
}

fn feed_url<'a>(ctx: &'a AppContext, url: Option<&'a str>) -> Result<&'a str> {
    match url.filter(|u| !u.trim().is_empty()) {
        Some(url) => Ok(url),
        None if !ctx.config.server.url.is_empty() => Ok(&ctx.config.server.url),
        None => Err(OpdsError::Configuration(
            "no feed URL given and no server configured".into(),
        )),
    }
}

fn describe(entry: &Entry) -> String {
    match classify(entry) {
        LinkAction::OpenStream {
            count, last_read, ..
        } => match last_read {
            Some(page) => format!("{} pages, read to {}", count, page),
            None => format!("{} pages", count),
        },
        action => action.label().to_string(),
    }
}

pub async fn browse(ctx: &AppContext, url: Option<&str>) -> Result<()> {
    let url = feed_url(ctx, url)?;
    ctx.controller.load_feed(url).await?;

    let nav = ctx.controller.snapshot();
    let Some(feed) = nav.feed else {
        println!("Feed is empty");
        return Ok(());
    };

    println!("{}", feed.display_title());
    if feed.entries.is_empty() {
        println!("No entries");
        return Ok(());
    }
    for (index, entry) in feed.entries.iter().enumerate() {
        println!("{:>4}  {} [{}]", index, entry.display_title(), describe(entry));
    }

    Ok(())
}

pub async fn read(ctx: &AppContext, options: &ReadOptions) -> Result<()> {
    let controller = &ctx.controller;
    if options.double {
        controller.set_page_mode(PageMode::Double);
    }

    controller.load_feed(feed_url(ctx, Some(options.url.as_str()))?).await?;
    let entry = controller
        .snapshot()
        .feed
        .and_then(|feed| feed.entries.get(options.entry).cloned())
        .ok_or_else(|| OpdsError::Other(format!("no entry {} in feed", options.entry)))?;

    controller.activate_entry(&entry).await;
    if let Some(error) = controller.snapshot().error {
        return Err(error.into());
    }

    match controller.snapshot().screen {
        Screen::ConfirmResume { pending_page, .. } => {
            println!("Last read page {}", pending_page);
            if options.resume {
                controller.confirm_resume().await;
            } else {
                controller.start_from_beginning().await;
            }
        }
        Screen::Browsing => {
            println!(
                "{} is not readable ({})",
                entry.display_title(),
                describe(&entry)
            );
            return Ok(());
        }
        Screen::Reading(_) => {}
    }

    if let Some(page) = options.page {
        controller.change_page(page).await;
    }
    show_page(ctx).await;

    for _ in 0..options.turns {
        controller.turn_forward().await;
        if controller.snapshot().reader().is_none() {
            println!("End of {}", entry.display_title());
            break;
        }
        show_page(ctx).await;
    }

    if let Screen::Reading(reader) = controller.snapshot().screen {
        wait_for_window(ctx, &reader).await;
    }

    Ok(())
}

async fn show_page(ctx: &AppContext) {
    let Some(reader) = ctx.controller.snapshot().reader().cloned() else {
        return;
    };
    let spread = if ctx.controller.is_double_spread() {
        format!("-{}", reader.current_page + 1)
    } else {
        String::new()
    };

    match ctx.controller.show_current_page().await {
        Ok(image) => {
            let ratio = image
                .aspect_ratio
                .map(|r| format!("{:.2}", r))
                .unwrap_or_else(|| "?".into());
            println!(
                "{} page {}{}/{}: {} bytes, aspect {}",
                reader.source.display_title(),
                reader.current_page,
                spread,
                reader.last_page(),
                image.bytes.len(),
                ratio
            );
        }
        Err(e) => eprintln!("  ! page {} - {}", reader.current_page, e),
    }
}

/// Block until every page the cache is preloading around the reader settles.
async fn wait_for_window(ctx: &AppContext, reader: &ReaderState) {
    let settings = ctx.controller.settings();
    if !settings.enable_preloading {
        return;
    }
    let radius = settings.effective_preload_radius();
    let first = reader.current_page.saturating_sub(radius).max(1);
    let last = reader.current_page.saturating_add(radius).min(reader.last_page());

    let urls: Vec<String> = (first..=last)
        .map(|page| page_url(&reader.base_url, &reader.stream_template, page))
        .filter(|url| ctx.cache.status(url).is_some())
        .collect();
    let results = join_all(urls.iter().map(|url| ctx.cache.wait_for(url))).await;

    let ready = results.iter().filter(|r| r.is_ok()).count();
    println!(
        "Preloaded {} of {} pages around page {} ({} cached)",
        ready,
        results.len(),
        reader.current_page,
        ctx.cache.len()
    );
}
