//! Edge-function pipeline
//!
//! Runs every edge function matching the request path in manifest order,
//! composing their effects. A function yielding with the next sentinel
//! hands control to the following match; an internal rewrite re-enters
//! the pipeline on the new path; everything else terminates the chain.
//! The chain is a loop driven by invocation outcomes, with the invocation
//! counter passed along rather than read back from any header.

use super::request::EdgeRequest;
use super::response::EdgeResponse;
use super::sandbox::{ModuleLoader, Sandbox};
use super::{
    EdgeEvent, FUNCTIONS_HEADER, MAX_EDGE_CALLS, NEXT_SENTINEL, REDIRECT_SENTINEL,
    REWRITE_SENTINEL,
};
use crate::error::{Error, Result};
use crate::http::Request;
use crate::manifest::EdgeManifest;
use crate::routing::matcher::PathMatcher;
use crate::url::{locale, strip_base_path, ParsedUrl};
use std::sync::Arc;

/// One edge function ready for matching: its page, compiled matcher and
/// module location.
pub struct EdgeFunctionDescriptor {
    pub page: String,
    pub matcher: PathMatcher,
    pub module_path: String,
}

/// What the pipeline decided, translated for the routing engine.
#[derive(Debug)]
pub enum EdgeOutcome {
    /// Emit a 3xx and finish.
    Redirect {
        location: String,
        status: u16,
        response: EdgeResponse,
    },
    /// Mutate the parsed URL and continue routing.
    Rewrite {
        target: String,
        response: EdgeResponse,
    },
    /// The function produced a buffered body; write it and finish.
    Data(EdgeResponse),
    /// The function is streaming; pump the readable side and finish.
    Streaming(EdgeResponse),
    /// No effect; routing continues past the edge catch-all.
    Next(EdgeResponse),
}

pub struct EdgePipeline {
    descriptors: Vec<EdgeFunctionDescriptor>,
    sandbox: Sandbox,
    base_path: String,
    locales: Vec<String>,
}

impl EdgePipeline {
    pub fn new(
        manifest: &EdgeManifest,
        loader: Arc<dyn ModuleLoader>,
        base_path: &str,
        locales: &[String],
    ) -> Result<Self> {
        let mut descriptors = Vec::with_capacity(manifest.functions().len());
        for def in manifest.functions() {
            let matcher = match &def.regexp {
                Some(regexp) => PathMatcher::from_regexp(regexp)?,
                None => PathMatcher::from_page(&def.page)?,
            };
            descriptors.push(EdgeFunctionDescriptor {
                page: def.page.clone(),
                matcher,
                module_path: def.file.clone(),
            });
        }
        Ok(Self {
            descriptors,
            sandbox: Sandbox::new(loader),
            base_path: base_path.to_string(),
            locales: locales.to_vec(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Whether any function matches `path`. Matching is case-sensitive.
    pub fn has_match(&self, path: &str) -> Result<bool> {
        for descriptor in &self.descriptors {
            if descriptor.matcher.matches(path)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Run the pipeline for a request.
    ///
    /// `parsed` supplies the URL context (locale, base path, query); the
    /// chain starts at its pathname.
    pub async fn run(&self, request: &Request, parsed: &ParsedUrl) -> Result<EdgeOutcome> {
        let mut calls: usize = 0;
        let mut current_path = parsed.pathname.clone();
        let mut carried: Option<EdgeResponse> = None;
        let mut last_event = EdgeEvent::Next;

        'chain: loop {
            for descriptor in &self.descriptors {
                let Some(params) = descriptor.matcher.matches(&current_path)? else {
                    continue;
                };

                if calls >= MAX_EDGE_CALLS {
                    return Err(Error::TooManyEdgeCalls(current_path));
                }
                calls += 1;

                let mut url = parsed.clone();
                url.pathname = current_path.clone();
                url.params = params;
                url.page = Some(descriptor.page.clone());

                let edge_request = EdgeRequest::new(&request.method, url)
                    .with_headers(request.headers().to_vec())
                    .with_body(request.body().to_vec());

                let mut response =
                    EdgeResponse::for_request(&request.method, request.referrer());
                if let Some(previous) = &carried {
                    response.inherit_headers(previous);
                }

                let result = self
                    .sandbox
                    .run(&descriptor.page, &descriptor.module_path, &edge_request, response)
                    .await?;
                last_event = result.event;

                if result.event == EdgeEvent::Next
                    && result.response.header(NEXT_SENTINEL).is_some()
                    && result.response.header(REWRITE_SENTINEL).is_none()
                    && result.response.header(REDIRECT_SENTINEL).is_none()
                {
                    // Yield: the next matching function continues with
                    // the accumulated headers.
                    carried = Some(result.response);
                    continue;
                }

                // Terminal for this chain; an internal rewrite may
                // re-enter on the new path.
                if let Some(target) = result.response.header(REWRITE_SENTINEL) {
                    let target = target.to_string();
                    if target.starts_with('/') {
                        let next_path = self.normalize_rewrite_target(&target);
                        if self.has_match(&next_path)? {
                            log::debug!(
                                "edge rewrite {} -> {} re-enters the pipeline",
                                current_path,
                                next_path
                            );
                            current_path = next_path;
                            carried = Some(result.response);
                            continue 'chain;
                        }
                    }
                }

                carried = Some(result.response);
                break 'chain;
            }

            // Chain exhausted: every match yielded, or nothing matched
            // at all (possibly after a rewrite to an unclaimed path).
            break;
        }

        let mut response = carried.unwrap_or_default();
        if calls > 0 {
            response.set_diagnostic_header(FUNCTIONS_HEADER, &calls.to_string());
        }

        Ok(Self::classify(last_event, response))
    }

    /// A rewrite target produced by user code uses the outer URL
    /// conventions: strip the base path and locale before matching it
    /// against the page tree.
    fn normalize_rewrite_target(&self, target: &str) -> String {
        let path = target.split(['?', '#']).next().unwrap_or(target);
        let (path, _) = strip_base_path(path, &self.base_path);
        let (path, _) = locale::normalize_locale_path(&path, &self.locales);
        path
    }

    fn classify(event: EdgeEvent, response: EdgeResponse) -> EdgeOutcome {
        if let Some(location) = response.header(REDIRECT_SENTINEL) {
            let location = location.to_string();
            let status = match response.status_code() {
                code @ 300..=399 => code,
                _ => 302,
            };
            return EdgeOutcome::Redirect {
                location,
                status,
                response,
            };
        }
        if let Some(target) = response.header(REWRITE_SENTINEL) {
            let target = target.to_string();
            return EdgeOutcome::Rewrite { target, response };
        }
        match event {
            EdgeEvent::Streaming => EdgeOutcome::Streaming(response),
            EdgeEvent::Data => EdgeOutcome::Data(response),
            EdgeEvent::Next => EdgeOutcome::Next(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::sandbox::EdgeFunction;
    use crate::manifest::EdgeFunctionDef;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;

    /// Loader that maps module paths to closures-in-structs.
    struct MapLoader {
        modules: HashMap<String, Arc<dyn EdgeFunction>>,
    }

    impl ModuleLoader for MapLoader {
        fn load(&self, module_path: &str) -> Result<Arc<dyn EdgeFunction>> {
            self.modules
                .get(module_path)
                .cloned()
                .ok_or_else(|| Error::page_not_found(module_path))
        }
    }

    struct RewriteTo(&'static str);

    #[async_trait]
    impl EdgeFunction for RewriteTo {
        async fn handle(&self, _req: &EdgeRequest, res: &mut EdgeResponse) -> Result<()> {
            res.rewrite(self.0)
        }
    }

    struct SendsText(&'static str);

    #[async_trait]
    impl EdgeFunction for SendsText {
        async fn handle(&self, _req: &EdgeRequest, res: &mut EdgeResponse) -> Result<()> {
            res.send_text(self.0)
        }
    }

    struct Yields(&'static str, &'static str);

    #[async_trait]
    impl EdgeFunction for Yields {
        async fn handle(&self, _req: &EdgeRequest, res: &mut EdgeResponse) -> Result<()> {
            res.set_header(self.0, self.1)?;
            res.next()
        }
    }

    // Module paths are unique per test: the sandbox cache is
    // process-wide and tests run concurrently.
    fn pipeline(
        entries: Vec<(&str, &str, Arc<dyn EdgeFunction>)>,
    ) -> EdgePipeline {
        let mut defs = Vec::new();
        let mut modules = HashMap::new();
        for (page, file, module) in entries {
            defs.push(EdgeFunctionDef {
                file: file.to_string(),
                page: page.to_string(),
                regexp: None,
            });
            modules.insert(file.to_string(), module);
        }
        let manifest = EdgeManifest::from_functions(defs);
        EdgePipeline::new(&manifest, Arc::new(MapLoader { modules }), "", &[]).unwrap()
    }

    fn get_request(path: &str) -> (Request, ParsedUrl) {
        (
            Request::new("GET", path),
            ParsedUrl::parse(path).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_chained_rewrite_runs_second_function() {
        let pipeline = pipeline(vec![
            (
                "/rewrite-me",
                "edge/one.mem",
                Arc::new(RewriteTo("/chained")) as Arc<dyn EdgeFunction>,
            ),
            (
                "/chained",
                "edge/two.mem",
                Arc::new(SendsText("this is a chained response")),
            ),
        ]);

        let (request, parsed) = get_request("/rewrite-me");
        let outcome = pipeline.run(&request, &parsed).await.unwrap();
        let EdgeOutcome::Data(response) = outcome else {
            panic!("expected data outcome");
        };
        assert_eq!(response.buffered_body(), b"this is a chained response");
        assert_eq!(response.header(FUNCTIONS_HEADER), Some("2"));
    }

    #[tokio::test]
    async fn test_yielding_functions_accumulate_headers() {
        let pipeline = pipeline(vec![
            (
                "/stack/:rest*",
                "edge/a.mem",
                Arc::new(Yields("x-first", "1")) as Arc<dyn EdgeFunction>,
            ),
            (
                "/stack/:rest*",
                "edge/b.mem",
                Arc::new(Yields("x-second", "2")),
            ),
        ]);

        let (request, parsed) = get_request("/stack/here");
        let outcome = pipeline.run(&request, &parsed).await.unwrap();
        let EdgeOutcome::Next(response) = outcome else {
            panic!("expected next outcome");
        };
        assert_eq!(response.header("x-first"), Some("1"));
        assert_eq!(response.header("x-second"), Some("2"));
        assert_eq!(response.header(FUNCTIONS_HEADER), Some("2"));
    }

    #[tokio::test]
    async fn test_rewrite_to_unmatched_path_returns_rewrite_outcome() {
        let pipeline = pipeline(vec![(
            "/from",
            "edge/from.mem",
            Arc::new(RewriteTo("/to?flag=1")) as Arc<dyn EdgeFunction>,
        )]);

        let (request, parsed) = get_request("/from");
        let outcome = pipeline.run(&request, &parsed).await.unwrap();
        let EdgeOutcome::Rewrite { target, .. } = outcome else {
            panic!("expected rewrite outcome");
        };
        assert_eq!(target, "/to?flag=1");
    }

    #[tokio::test]
    async fn test_external_rewrite_is_not_re_entered() {
        let pipeline = pipeline(vec![(
            "/external",
            "edge/external.mem",
            Arc::new(RewriteTo("https://vercel.com")) as Arc<dyn EdgeFunction>,
        )]);

        let (request, parsed) = get_request("/external");
        let outcome = pipeline.run(&request, &parsed).await.unwrap();
        let EdgeOutcome::Rewrite { target, .. } = outcome else {
            panic!("expected rewrite outcome");
        };
        assert_eq!(target, "https://vercel.com");
    }

    #[tokio::test]
    async fn test_redirect_outcome_carries_status() {
        struct Redirects;

        #[async_trait]
        impl EdgeFunction for Redirects {
            async fn handle(&self, _req: &EdgeRequest, res: &mut EdgeResponse) -> Result<()> {
                res.redirect_with_status(308, "https://example.com/moved")
            }
        }

        let pipeline = pipeline(vec![(
            "/moved",
            "edge/moved.mem",
            Arc::new(Redirects) as Arc<dyn EdgeFunction>,
        )]);

        let (request, parsed) = get_request("/moved");
        let outcome = pipeline.run(&request, &parsed).await.unwrap();
        let EdgeOutcome::Redirect {
            location, status, ..
        } = outcome
        else {
            panic!("expected redirect outcome");
        };
        assert_eq!(location, "https://example.com/moved");
        assert_eq!(status, 308);
    }

    #[tokio::test]
    async fn test_rewrite_loop_trips_recursion_cap() {
        let pipeline = pipeline(vec![
            (
                "/ping",
                "edge/ping.mem",
                Arc::new(RewriteTo("/pong")) as Arc<dyn EdgeFunction>,
            ),
            ("/pong", "edge/pong.mem", Arc::new(RewriteTo("/ping"))),
        ]);

        let (request, parsed) = get_request("/ping");
        let err = pipeline.run(&request, &parsed).await.unwrap_err();
        assert!(matches!(err, Error::TooManyEdgeCalls(_)));
    }

    #[tokio::test]
    async fn test_no_match_yields_next_with_empty_response() {
        let pipeline = pipeline(vec![(
            "/only-here",
            "edge/h.mem",
            Arc::new(SendsText("x")) as Arc<dyn EdgeFunction>,
        )]);

        let (request, parsed) = get_request("/somewhere-else");
        let outcome = pipeline.run(&request, &parsed).await.unwrap();
        let EdgeOutcome::Next(response) = outcome else {
            panic!("expected next outcome");
        };
        assert!(response.header(FUNCTIONS_HEADER).is_none());
        assert!(response.headers().is_empty());
    }

    #[tokio::test]
    async fn test_params_and_page_visible_to_function() {
        struct EchoesUrl;

        #[async_trait]
        impl EdgeFunction for EchoesUrl {
            async fn handle(&self, req: &EdgeRequest, res: &mut EdgeResponse) -> Result<()> {
                res.set_header("req-url-path", &req.url.pathname)?;
                res.set_header(
                    "req-url-params",
                    &serde_json::to_string(&req.url.params)?,
                )?;
                res.set_header("req-url-page", req.url.page.as_deref().unwrap_or(""))?;
                res.next()
            }
        }

        let pipeline = pipeline(vec![(
            "/dynamic/[id]",
            "edge/dyn.mem",
            Arc::new(EchoesUrl) as Arc<dyn EdgeFunction>,
        )]);

        let (request, parsed) = get_request("/dynamic/abc123");
        let outcome = pipeline.run(&request, &parsed).await.unwrap();
        let EdgeOutcome::Next(response) = outcome else {
            panic!("expected next outcome");
        };
        assert_eq!(response.header("req-url-path"), Some("/dynamic/abc123"));
        assert_eq!(response.header("req-url-params"), Some(r#"{"id":"abc123"}"#));
        assert_eq!(response.header("req-url-page"), Some("/dynamic/[id]"));
    }

    #[tokio::test]
    async fn test_ab_bucket_cookie_and_rewrite() {
        struct Bucket;

        #[async_trait]
        impl EdgeFunction for Bucket {
            async fn handle(&self, req: &EdgeRequest, res: &mut EdgeResponse) -> Result<()> {
                let bucket = match req.cookie("bucket") {
                    Some(existing) => existing.to_string(),
                    None => {
                        let chosen = if rand::random::<bool>() { "a" } else { "b" };
                        res.cookie(
                            "bucket",
                            &json!(chosen),
                            &crate::edge::CookieOptions::default(),
                        )?;
                        chosen.to_string()
                    }
                };
                res.rewrite(&format!("/home/{}", bucket))
            }
        }

        let pipeline = pipeline(vec![(
            "/home",
            "edge/home.mem",
            Arc::new(Bucket) as Arc<dyn EdgeFunction>,
        )]);

        let (request, parsed) = get_request("/home");
        let outcome = pipeline.run(&request, &parsed).await.unwrap();
        let EdgeOutcome::Rewrite { target, response } = outcome else {
            panic!("expected rewrite outcome");
        };
        assert!(target == "/home/a" || target == "/home/b");
        let cookies = response.header_all("set-cookie");
        assert_eq!(cookies.len(), 1);
        assert!(cookies[0].starts_with(&format!(
            "bucket={}; Path=/",
            target.trim_start_matches("/home/")
        )));
    }
}
