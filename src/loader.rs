//! Resource loader: turns an app URL into a populated [`SourceSet`] and a
//! detached DOM fragment, then signals the owning app once per phase.
//!
//! The link phase and the script phase run concurrently. Each phase fetches
//! its batch all-or-nothing and signals exactly once on success, even when
//! the batch is empty. A failed batch never signals, so the app stays in
//! `loading`; the failure is recorded on the app instead.

use crate::app::MicroApp;
use crate::dom;
use crate::error::MicroAppError;
use crate::events::LoadPhase;
use crate::fetch::Fetcher;
use crate::source::{LinkSource, ScriptSource, SourceSet};
use futures::future::try_join_all;
use kuchikiki::NodeRef;
use rand::Rng;
use regex::{Captures, Regex};
use std::sync::LazyLock;

static HEAD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<head(\s[^>]*)?>(.*?)</head\s*>").expect("valid head pattern")
});

static BODY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<body(\s[^>]*)?>(.*?)</body\s*>").expect("valid body pattern")
});

const NONCE_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const NONCE_LEN: usize = 13;

fn rename_region(html: &str, pattern: &Regex, tag: &str) -> String {
    pattern
        .replacen(html, 1, |caps: &Captures| {
            format!(
                "<{tag}{}>{}</{tag}>",
                caps.get(1).map_or("", |m| m.as_str()),
                &caps[2],
            )
        })
        .into_owned()
}

/// Renames the document's `head` and `body` to `micro-app-head` and
/// `micro-app-body`: a document can only have one of each, and the host
/// already does.
pub fn rewrite_singleton_tags(html: &str) -> String {
    let html = rename_region(html, &HEAD_PATTERN, "micro-app-head");
    rename_region(&html, &BODY_PATTERN, "micro-app-body")
}

fn nonce(taken: &SourceSet) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let candidate: String = (0..NONCE_LEN)
            .map(|_| NONCE_ALPHABET[rng.gen_range(0..NONCE_ALPHABET.len())] as char)
            .collect();
        if !taken.scripts.contains_key(&candidate) {
            return candidate;
        }
    }
}

fn is_stylesheet(node: &NodeRef) -> bool {
    dom::attribute(node, "rel").is_some_and(|rel| {
        rel.split_ascii_whitespace()
            .any(|token| token.eq_ignore_ascii_case("stylesheet"))
    })
}

/// Walks `parent` depth-first, recording stylesheet links and scripts into
/// `source` and removing every `link` and `script` element. Inline `style`
/// elements stay where they are.
pub fn extract_source_dom(parent: &NodeRef, source: &mut SourceSet) {
    for child in parent.children().collect::<Vec<_>>() {
        extract_source_dom(&child, source);

        if dom::is_element(&child, "link") {
            if let Some(href) = dom::attribute(&child, "href").filter(|href| !href.is_empty()) {
                if is_stylesheet(&child) {
                    source.links.insert(href, LinkSource::default());
                }
            }
            child.detach();
        } else if dom::is_element(&child, "script") {
            if let Some(src) = dom::attribute(&child, "src").filter(|src| !src.is_empty()) {
                source.scripts.insert(
                    src,
                    ScriptSource {
                        code: String::new(),
                        is_external: true,
                    },
                );
            } else {
                let code = child.text_contents();
                if !code.is_empty() {
                    let key = nonce(source);
                    source.scripts.insert(
                        key,
                        ScriptSource {
                            code,
                            is_external: false,
                        },
                    );
                }
            }
            child.detach();
        }
    }
}

/// The renamed head inside `fragment`, created at the front when the
/// document had none. Only needed once there are stylesheets to place.
fn head_container(fragment: &NodeRef) -> NodeRef {
    dom::find_element(fragment, "micro-app-head").unwrap_or_else(|| {
        let head = dom::new_element("micro-app-head");
        fragment.prepend(head.clone());
        head
    })
}

async fn fetch_resource(app: &MicroApp, fetcher: &dyn Fetcher, reference: &str) -> Result<String, MicroAppError> {
    let url = app.resolve(reference)?;
    fetcher
        .fetch_text(&url)
        .await
        .map_err(|source| MicroAppError::ResourceFetch { url, source })
}

async fn load_links(app: &MicroApp, fetcher: &dyn Fetcher, fragment: &NodeRef) {
    let hrefs: Vec<String> = app.with_source(|source| source.links.keys().cloned().collect());

    if !hrefs.is_empty() {
        let head = head_container(fragment);
        let batch = hrefs.iter().map(|href| fetch_resource(app, fetcher, href));
        let codes = match try_join_all(batch).await {
            Ok(codes) => codes,
            Err(error) => return app.fail(error),
        };

        for (href, code) in hrefs.iter().zip(codes) {
            let style = dom::new_element("style");
            style.append(NodeRef::new_text(code.clone()));
            head.append(style);
            app.with_source(|source| {
                if let Some(link) = source.links.get_mut(href) {
                    link.code = code;
                }
            });
        }
    }

    app.on_phase_complete(LoadPhase::Links, fragment.clone());
}

async fn load_scripts(app: &MicroApp, fetcher: &dyn Fetcher, fragment: &NodeRef) {
    let external = app.with_source(|source| source.external_scripts());

    if !external.is_empty() {
        let batch = external.iter().map(|src| fetch_resource(app, fetcher, src));
        let codes = match try_join_all(batch).await {
            Ok(codes) => codes,
            Err(error) => return app.fail(error),
        };

        app.with_source(|source| {
            for (src, code) in external.iter().zip(codes) {
                if let Some(script) = source.scripts.get_mut(src) {
                    script.code = code;
                }
            }
        });
    }

    app.on_phase_complete(LoadPhase::Scripts, fragment.clone());
}

/// Loads `app`'s document and resources. Spawned once per app.
pub(crate) async fn load_html(app: MicroApp) {
    let fetcher = app.fetcher();

    let html = match fetcher.fetch_text(app.url()).await {
        Ok(html) => html,
        Err(source) => {
            return app.fail(MicroAppError::DocumentFetch {
                url: app.url().to_string(),
                source,
            })
        }
    };

    let fragment = dom::parse_fragment(&rewrite_singleton_tags(&html));
    app.with_source(|source| extract_source_dom(&fragment, source));

    tracing::debug!(
        app = %app.name(),
        links = app.with_source(|source| source.links.len()),
        scripts = app.with_source(|source| source.scripts.len()),
        "extracted resources"
    );

    futures::join!(
        load_links(&app, fetcher.as_ref(), &fragment),
        load_scripts(&app, fetcher.as_ref(), &fragment),
    );
}
