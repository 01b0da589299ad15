//! The routing engine
//!
//! Executes the ordered route groups for each request and guarantees at
//! most one terminal response: headers, redirects, rewrites-before-files,
//! filesystem routes, the edge-function catch-all, the page checker,
//! rewrites-after-files, fallback rewrites, and finally the page
//! catch-all. Handlers receive the shared parsed URL; mutations flow back
//! through explicit route outcomes, so a handler that does not finish
//! leaves the URL exactly as it found it.

use super::matcher::{
    compile_destination, interpolate_params, HasContext, Params, PathMatcher,
};
use super::{Route, RouteKind, RouteOutcome};
use crate::cache::{CachedRender, ResponseCache};
use crate::edge::{adapter, EdgeOutcome, EdgePipeline};
use crate::error::pages::ErrorPages;
use crate::error::{Error, Result};
use crate::http::{Request, Response};
use crate::manifest::{PagesManifest, RoutesManifest};
use crate::render::{Render, StaticServe};
use crate::url::{
    add_path_prefix, locale, strip_base_path, ParsedUrl, QueryMap, QueryValue,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Query key carrying the detected locale to the render layer.
pub const LOCALE_QUERY_KEY: &str = "__nextLocale";

/// Query key marking a data request for the render layer.
pub const DATA_REQUEST_QUERY_KEY: &str = "__nextDataReq";

/// Minimal-mode hint header: the upstream proxy already resolved the
/// page, so locale negotiation and rewrite evaluation are skipped.
pub const MATCHED_PATH_HEADER: &str = "x-matched-path";

/// Cookie set by preview mode; its presence bypasses the response cache.
const PREVIEW_BYPASS_COOKIE: &str = "__prerender_bypass";

/// Engine construction switches.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Behind a trusted proxy: honor `x-matched-path`, re-throw internal
    /// errors instead of rendering them.
    pub minimal_mode: bool,
    /// Expose pages at their filesystem paths (enables the page checker
    /// group).
    pub use_fs_public_routes: bool,
}

/// Per-request mutable state owned by the engine.
pub struct RouteContext<'a> {
    pub request: &'a Request,
    pub parsed: ParsedUrl,
    /// Whether the incoming path carried the configured base path.
    pub had_base_path: bool,
    /// Whether the incoming path carried a locale prefix.
    pub locale_in_path: bool,
    /// Set once any rewrite has retargeted the request; rewritten paths
    /// serve regardless of the original base-path carriage.
    pub rewrote: bool,
    /// The rewrite target, surfaced to the render layer.
    pub rewrote_url: Option<String>,
    /// Headers accumulated by header routes and edge functions.
    extra_headers: Vec<(String, String)>,
    /// Per-request memo for the page-existence oracle.
    page_exists_memo: HashMap<String, bool>,
}

impl<'a> RouteContext<'a> {
    fn new(request: &'a Request, parsed: ParsedUrl) -> Self {
        Self {
            request,
            parsed,
            had_base_path: false,
            locale_in_path: false,
            rewrote: false,
            rewrote_url: None,
            extra_headers: Vec::new(),
            page_exists_memo: HashMap::new(),
        }
    }

    /// The pathname custom routes match against: locale restored exactly
    /// as the client sent it. Custom routes accept the base path
    /// verbatim from configuration, so it is handled by the caller.
    fn custom_match_path(&self) -> String {
        let mut path = self.parsed.pathname.clone();
        if self.locale_in_path {
            if let Some(locale) = &self.parsed.locale {
                path = add_path_prefix(&path, &format!("/{}", locale));
            }
        }
        path
    }
}

pub struct RoutingEngine {
    base_path: String,
    locales: Vec<String>,
    default_locale: Option<String>,
    domains: Vec<locale::DomainLocale>,
    locale_detection: bool,
    headers: Vec<Route>,
    redirects: Vec<Route>,
    before_files: Vec<Route>,
    after_files: Vec<Route>,
    fallback: Vec<Route>,
    fs_routes: Vec<Route>,
    edge_route: Route,
    page_checker_route: Route,
    catch_all_route: Route,
    dynamic_routes: Vec<(String, PathMatcher)>,
    pages: PagesManifest,
    render: Arc<dyn Render>,
    statics: Arc<dyn StaticServe>,
    response_cache: Arc<ResponseCache>,
    error_pages: ErrorPages,
    edge: Option<Arc<EdgePipeline>>,
    options: EngineOptions,
}

impl RoutingEngine {
    pub fn new(
        manifest: &RoutesManifest,
        pages: PagesManifest,
        edge: Option<Arc<EdgePipeline>>,
        render: Arc<dyn Render>,
        statics: Arc<dyn StaticServe>,
        options: EngineOptions,
    ) -> Result<Self> {
        let headers = manifest
            .headers
            .iter()
            .map(Route::header)
            .collect::<Result<Vec<_>>>()?;
        let redirects = manifest
            .redirects
            .iter()
            .map(Route::redirect)
            .collect::<Result<Vec<_>>>()?;
        let before_files = manifest
            .rewrites
            .before_files()
            .iter()
            .map(Route::rewrite)
            .collect::<Result<Vec<_>>>()?;
        let after_files = manifest
            .rewrites
            .after_files()
            .iter()
            .map(Route::rewrite)
            .collect::<Result<Vec<_>>>()?;
        let fallback = manifest
            .rewrites
            .fallback()
            .iter()
            .map(Route::rewrite)
            .collect::<Result<Vec<_>>>()?;

        let fs_routes = vec![
            Route::filesystem("_next/static files", "/_next/static/:path*", None)?,
            Route::filesystem("_next/image", "/_next/image/:path*", None)?,
            Route::filesystem("_next catch-all guard", "/_next/:path*", Some(404))?,
            Route::public_file()?,
        ];

        // Dynamic page routes, most specific first.
        let mut dynamic_routes = Vec::new();
        for page in pages.pages() {
            if page.contains('[') {
                dynamic_routes.push((page.to_string(), PathMatcher::from_page(page)?));
            }
        }
        dynamic_routes.sort_by(|(_, a), (_, b)| super::matcher::cmp_route_specificity(a, b));

        let (domains, locale_detection) = match &manifest.i18n {
            Some(i18n) => (i18n.domains.clone(), i18n.locale_detection),
            None => (Vec::new(), true),
        };

        Ok(Self {
            base_path: manifest.base_path.clone(),
            locales: manifest.locales().to_vec(),
            default_locale: manifest.default_locale().map(|s| s.to_string()),
            domains,
            locale_detection,
            headers,
            redirects,
            before_files,
            after_files,
            fallback,
            fs_routes,
            edge_route: Route::catch_all_edge()?,
            page_checker_route: Route::page_checker()?,
            catch_all_route: Route::catch_all_page()?,
            dynamic_routes,
            pages,
            error_pages: ErrorPages::new(Arc::clone(&render)),
            render,
            statics,
            response_cache: Arc::new(ResponseCache::new()),
            edge,
            options,
        })
    }

    pub fn response_cache(&self) -> &Arc<ResponseCache> {
        &self.response_cache
    }

    /// Route one request to a terminal response.
    ///
    /// Errors propagate to the caller, which owns logging and the error
    /// pages; `Decode` failures there become 400, the rest 500.
    pub async fn run(&self, request: &Request) -> Result<Response> {
        let mut ctx = self.prepare(request)?;

        // Minimal mode with a resolved path: the upstream already did
        // locale negotiation and rewrite evaluation.
        if self.options.minimal_mode {
            if let Some(matched) = request.header(MATCHED_PATH_HEADER) {
                let (path, _) = strip_base_path(matched, &self.base_path);
                ctx.parsed.pathname = path;
                if let Some(response) = self.run_filesystem(&mut ctx).await? {
                    return Ok(self.commit(&mut ctx, response));
                }
                let response = self.render_catch_all(&mut ctx, false).await?;
                return Ok(self.commit(&mut ctx, response));
            }
        }

        // 1. Header routes: set response headers, never finish.
        for route in &self.headers {
            if let Some(params) = self.match_custom(&ctx, route)? {
                let RouteKind::Header { headers } = &route.kind else {
                    continue;
                };
                for (key, value) in headers {
                    let key = interpolate_params(key, &params).unwrap_or_else(|_| key.clone());
                    let value =
                        interpolate_params(value, &params).unwrap_or_else(|_| value.clone());
                    ctx.extra_headers.push((key, value));
                }
            }
        }

        // 2. Redirect routes: emit a 3xx and finish.
        for route in &self.redirects {
            if let Some(params) = self.match_custom(&ctx, route)? {
                let outcome = self.apply_redirect(route, &params)?;
                if let Some(response) = outcome.response {
                    return Ok(self.commit(&mut ctx, response));
                }
            }
        }

        // 3. Rewrites before filesystem routes.
        if let Some(response) = self.run_rewrites(&mut ctx, &self.before_files).await? {
            return Ok(self.commit(&mut ctx, response));
        }

        // 4. Filesystem routes.
        if let Some(response) = self.run_filesystem(&mut ctx).await? {
            return Ok(self.commit(&mut ctx, response));
        }

        // 5. Edge-function catch-all.
        if let Some(response) = self
            .dispatch_builtin(&self.edge_route, &mut ctx)
            .await?
        {
            return Ok(self.commit(&mut ctx, response));
        }

        // 6. Page checker: serve pages at their filesystem paths.
        if self.options.use_fs_public_routes {
            if let Some(response) = self
                .dispatch_builtin(&self.page_checker_route, &mut ctx)
                .await?
            {
                return Ok(self.commit(&mut ctx, response));
            }
        }

        // 7. Rewrites after filesystem routes.
        if let Some(response) = self.run_rewrites(&mut ctx, &self.after_files).await? {
            return Ok(self.commit(&mut ctx, response));
        }

        // 8. Fallback rewrites, preceded by a page / dynamic-route check.
        if !self.fallback.is_empty() {
            if let Some(response) = self
                .dispatch_builtin(&self.page_checker_route, &mut ctx)
                .await?
            {
                return Ok(self.commit(&mut ctx, response));
            }
            if self.matches_dynamic_route(&ctx.parsed.pathname)? {
                if let Some(response) = self.catch_all_guarded(&mut ctx).await? {
                    return Ok(self.commit(&mut ctx, response));
                }
            }
            if let Some(response) = self.run_rewrites(&mut ctx, &self.fallback).await? {
                return Ok(self.commit(&mut ctx, response));
            }
        }

        // 9. Page catch-all.
        match self
            .dispatch_builtin(&self.catch_all_route, &mut ctx)
            .await?
        {
            Some(response) => Ok(self.commit(&mut ctx, response)),
            None => Err(Error::internal("page catch-all did not finish")),
        }
    }

    /// Built-in (non-custom) route dispatch on the kind tag.
    async fn dispatch_builtin(
        &self,
        route: &Route,
        ctx: &mut RouteContext<'_>,
    ) -> Result<Option<Response>> {
        let missing_base_path = route.require_base_path
            && !ctx.had_base_path
            && !ctx.rewrote
            && !self.base_path.is_empty();
        // The page catch-all still runs without the base path: it owns
        // the 404 for unqualified paths.
        if missing_base_path && !matches!(route.kind, RouteKind::CatchAllPage) {
            return Ok(None);
        }

        match &route.kind {
            RouteKind::CatchAllEdge => {
                let Some(pipeline) = &self.edge else {
                    return Ok(None);
                };
                self.run_edge(ctx, pipeline).await
            }
            RouteKind::PageChecker => {
                let pathname = ctx.parsed.pathname.clone();
                if self.page_exists(ctx, &pathname).await? {
                    return self.catch_all_guarded(ctx).await;
                }
                Ok(None)
            }
            RouteKind::CatchAllPage => self.render_catch_all(ctx, false).await.map(Some),
            RouteKind::Filesystem | RouteKind::PublicFile => {
                self.serve_fs_route(route, ctx).await
            }
            _ => Ok(None),
        }
    }

    /// Parse the URL and normalize base path, data requests and locale.
    fn prepare<'a>(&self, request: &'a Request) -> Result<RouteContext<'a>> {
        let parsed = ParsedUrl::parse(&request.uri)?;
        let mut ctx = RouteContext::new(request, parsed);

        if !self.base_path.is_empty() {
            let (stripped, had) = strip_base_path(&ctx.parsed.pathname, &self.base_path);
            ctx.parsed.pathname = stripped;
            ctx.had_base_path = had;
            ctx.parsed.base_path = Some(self.base_path.clone());
        } else {
            ctx.had_base_path = true;
        }

        if ctx.parsed.extract_data_request() {
            ctx.parsed.query.insert(
                DATA_REQUEST_QUERY_KEY.to_string(),
                QueryValue::Single("1".to_string()),
            );
        }

        if !self.locales.is_empty() && !self.options.minimal_mode {
            self.negotiate_locale(&mut ctx);
        }

        ctx.parsed.preflight = request.is_preflight();
        Ok(ctx)
    }

    /// Locale negotiation: path segment first, then domain, cookie and
    /// `Accept-Language`, then the configured default. The detected
    /// locale is stashed in the query for the render layer. API routes
    /// never carry a locale.
    fn negotiate_locale(&self, ctx: &mut RouteContext<'_>) {
        let (stripped, detected) =
            locale::detect_locale(&ctx.parsed.pathname, &self.locales);
        if detected.is_some() {
            ctx.parsed.pathname = stripped;
            ctx.locale_in_path = true;
        }

        let domain_default = locale::detect_domain_locale(&self.domains, ctx.request.host())
            .map(|d| d.default_locale.clone());

        let negotiated = if self.locale_detection {
            locale::locale_from_cookie(ctx.request.cookie("NEXT_LOCALE"), &self.locales)
                .map(|s| s.to_string())
                .or_else(|| {
                    locale::locale_from_accept_language(
                        ctx.request.header("accept-language"),
                        &self.locales,
                    )
                    .map(|s| s.to_string())
                })
        } else {
            None
        };

        let chosen = detected
            .or(negotiated)
            .or(domain_default)
            .or_else(|| self.default_locale.clone());

        ctx.parsed.default_locale = self.default_locale.clone();
        if let Some(chosen) = chosen {
            let is_api =
                ctx.parsed.pathname == "/api" || ctx.parsed.pathname.starts_with("/api/");
            if !is_api {
                ctx.parsed.query.insert(
                    LOCALE_QUERY_KEY.to_string(),
                    QueryValue::Single(chosen.clone()),
                );
                ctx.parsed.locale = Some(chosen);
            }
        }
    }

    /// Match a custom route (header/redirect/rewrite) against the path
    /// with base path and locale kept, evaluating `has` predicates.
    fn match_custom(&self, ctx: &RouteContext<'_>, route: &Route) -> Result<Option<Params>> {
        if route.require_base_path && !self.base_path.is_empty() && !ctx.had_base_path {
            return Ok(None);
        }

        let match_path = ctx.custom_match_path();
        let Some(mut params) = route.matcher.matches(&match_path)? else {
            return Ok(None);
        };

        if !route.has.is_empty() {
            let has_ctx = HasContext {
                headers: ctx.request.headers(),
                cookies: ctx.request.cookies(),
                query: &ctx.parsed.query,
                host: ctx.request.host(),
            };
            for predicate in &route.has {
                let Some(captured) = predicate.matches(&has_ctx)? else {
                    return Ok(None);
                };
                for (name, value) in captured {
                    params.insert(name, value);
                }
            }
        }

        Ok(Some(params))
    }

    /// Build the redirect response for a matched redirect route.
    fn apply_redirect(&self, route: &Route, params: &Params) -> Result<RouteOutcome> {
        let RouteKind::Redirect {
            destination,
            status,
        } = &route.kind
        else {
            return Ok(RouteOutcome::next());
        };

        let (mut target, extra_query) = compile_destination(destination, params)?;
        if target.starts_with('/') {
            target = add_path_prefix(&target, &self.base_path);
        }
        let query = crate::url::format_query(&extra_query);
        if !query.is_empty() {
            target = format!(
                "{}{}{}",
                target,
                if target.contains('?') { "&" } else { "?" },
                query
            );
        }
        log::debug!("redirect route {} -> {} ({})", route.name, target, status);
        Ok(RouteOutcome::finished(Response::redirect(&target, *status)))
    }

    /// Run one rewrite group. A rewrite either proxies an absolute
    /// target (finishing), or mutates the parsed URL and re-checks the
    /// filesystem when its `check` flag is set.
    async fn run_rewrites(
        &self,
        ctx: &mut RouteContext<'_>,
        routes: &[Route],
    ) -> Result<Option<Response>> {
        for route in routes {
            let Some(params) = self.match_custom(ctx, route)? else {
                continue;
            };
            let RouteKind::Rewrite { destination } = &route.kind else {
                continue;
            };

            let (target, extra_query) = compile_destination(destination, &params)?;
            if target.starts_with("http://") || target.starts_with("https://") {
                log::debug!("rewrite route {} proxies to {}", route.name, target);
                return adapter::proxy_external(&target, ctx.request)
                    .await
                    .map(Some);
            }

            let outcome = self.apply_internal_rewrite(&target, extra_query);
            self.merge_outcome(ctx, outcome);

            if route.check {
                if let Some(response) = self.apply_check_true(ctx).await? {
                    return Ok(Some(response));
                }
            }
        }
        Ok(None)
    }

    /// Normalize an internal rewrite target into pathname/query mutations.
    fn apply_internal_rewrite(&self, target: &str, extra_query: QueryMap) -> RouteOutcome {
        let (path, _) = strip_base_path(target, &self.base_path);
        let (path, _) = locale::normalize_locale_path(&path, &self.locales);
        RouteOutcome::rewrite(path, Some(extra_query))
    }

    /// Merge a non-finishing handler outcome into the shared URL. With no
    /// explicit mutation the URL is untouched, satisfying the rollback
    /// guarantee without aliasing.
    fn merge_outcome(&self, ctx: &mut RouteContext<'_>, outcome: RouteOutcome) {
        if let Some(pathname) = outcome.pathname {
            if pathname != ctx.parsed.pathname {
                ctx.rewrote = true;
                ctx.parsed.pathname = pathname;
            }
        }
        if let Some(query) = outcome.query {
            for (key, value) in query {
                ctx.parsed.query.insert(key, value);
            }
        }
    }

    /// The built-in filesystem group, in route-table order: `_next`
    /// assets, the `_next` 404 guard, then public files.
    async fn run_filesystem(&self, ctx: &mut RouteContext<'_>) -> Result<Option<Response>> {
        for route in &self.fs_routes {
            if route.require_base_path
                && !ctx.had_base_path
                && !ctx.rewrote
                && !self.base_path.is_empty()
            {
                continue;
            }
            if route.matcher.matches(&ctx.parsed.pathname)?.is_none() {
                continue;
            }
            if let Some(response) = self.serve_fs_route(route, ctx).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// Serve one matched filesystem route.
    async fn serve_fs_route(
        &self,
        route: &Route,
        ctx: &mut RouteContext<'_>,
    ) -> Result<Option<Response>> {
        match &route.kind {
            RouteKind::Filesystem => {
                // Guard routes answer with their fixed status.
                if let Some(status) = route.status_code {
                    log::debug!("{} answered {} for {}", route.name, status, ctx.parsed.pathname);
                    return Ok(Some(Response::not_found().with_status(status)));
                }
                if let Some(guard) = method_guard(ctx.request) {
                    return Ok(Some(guard));
                }
                match self.statics.serve_static(&ctx.parsed.pathname).await? {
                    Some(response) => Ok(Some(response)),
                    // Assets under _next/static either exist or 404;
                    // nothing later in the table may claim them.
                    None => Ok(Some(Response::not_found())),
                }
            }
            RouteKind::PublicFile => {
                let Some(response) = self.statics.serve_static(&ctx.parsed.pathname).await?
                else {
                    return Ok(None);
                };
                if let Some(guard) = method_guard(ctx.request) {
                    return Ok(Some(guard));
                }
                Ok(Some(response))
            }
            _ => Ok(None),
        }
    }

    /// The edge catch-all. Returns a response to finish with, or `None`
    /// to continue routing (after applying any rewrite mutation).
    async fn run_edge(
        &self,
        ctx: &mut RouteContext<'_>,
        pipeline: &EdgePipeline,
    ) -> Result<Option<Response>> {
        let outcome = pipeline.run(ctx.request, &ctx.parsed).await?;

        // A preflight probe short-circuits after the chain with the
        // accumulated headers and an empty body.
        if ctx.parsed.preflight {
            let response = match &outcome {
                EdgeOutcome::Redirect { response, .. }
                | EdgeOutcome::Rewrite { response, .. }
                | EdgeOutcome::Data(response)
                | EdgeOutcome::Streaming(response)
                | EdgeOutcome::Next(response) => adapter::preflight_response(response),
            };
            return Ok(Some(response));
        }

        match outcome {
            EdgeOutcome::Next(response) => {
                ctx.extra_headers.extend(adapter::collect_headers(&response));
                Ok(None)
            }
            EdgeOutcome::Rewrite { target, response } if target.starts_with('/') => {
                ctx.extra_headers.extend(adapter::collect_headers(&response));
                let parsed_target = ParsedUrl::parse(&target)?;
                ctx.rewrote_url = Some(target);
                let outcome = self.apply_internal_rewrite(
                    &parsed_target.pathname,
                    parsed_target.query,
                );
                self.merge_outcome(ctx, outcome);
                Ok(None)
            }
            terminal => adapter::to_response(terminal, ctx.request).await.map(Some),
        }
    }

    fn matches_dynamic_route(&self, pathname: &str) -> Result<bool> {
        for (_, matcher) in &self.dynamic_routes {
            if matcher.matches(pathname)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Memoized page-existence oracle.
    async fn page_exists(&self, ctx: &mut RouteContext<'_>, path: &str) -> Result<bool> {
        if let Some(&known) = ctx.page_exists_memo.get(path) {
            return Ok(known);
        }
        let exists = self.pages.contains(path) || self.render.has_page(path).await?;
        ctx.page_exists_memo.insert(path.to_string(), exists);
        Ok(exists)
    }

    /// Filesystem + page + dynamic-route re-check after a rewrite, run
    /// as if the request had just arrived at the filesystem group. Any
    /// page hit renders with the bubble-no-fallback marker so a
    /// fallback-less dynamic page reads as a miss instead of recursing.
    async fn apply_check_true(&self, ctx: &mut RouteContext<'_>) -> Result<Option<Response>> {
        if let Some(response) = self.run_filesystem(ctx).await? {
            return Ok(Some(response));
        }

        let pathname = ctx.parsed.pathname.clone();
        if self.page_exists(ctx, &pathname).await? {
            return self.catch_all_guarded(ctx).await;
        }

        if self.matches_dynamic_route(&pathname)? {
            return self.catch_all_guarded(ctx).await;
        }

        Ok(None)
    }

    /// Invoke the page catch-all with bubbling enabled, translating a
    /// bubbled `NoFallback` into "keep routing".
    async fn catch_all_guarded(&self, ctx: &mut RouteContext<'_>) -> Result<Option<Response>> {
        match self.render_catch_all(ctx, true).await {
            Ok(response) => Ok(Some(response)),
            Err(Error::NoFallback) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The page catch-all: resolve the page, consult the response cache,
    /// and translate the render outcome onto the wire.
    async fn render_catch_all(
        &self,
        ctx: &mut RouteContext<'_>,
        bubble_no_fallback: bool,
    ) -> Result<Response> {
        let pathname = ctx.parsed.pathname.clone();

        if !ctx.had_base_path && !ctx.rewrote && !self.base_path.is_empty() {
            return Ok(self
                .error_pages
                .render_status(404, &ctx.parsed.query)
                .await);
        }

        // Resolve a concrete page: exact match first, then the dynamic
        // routes in specificity order.
        let mut query = ctx.parsed.query.clone();
        let page = if self.pages.contains(&pathname) {
            Some(pathname.clone())
        } else {
            let mut found = None;
            for (page, matcher) in &self.dynamic_routes {
                if let Some(params) = matcher.matches(&pathname)? {
                    for (name, value) in &params {
                        query.insert(name.clone(), value.clone());
                    }
                    ctx.parsed.params = params;
                    ctx.parsed.page = Some(page.clone());
                    found = Some(page.clone());
                    break;
                }
            }
            found
        };

        let Some(page) = page else {
            if bubble_no_fallback {
                return Err(Error::NoFallback);
            }
            return Ok(self
                .error_pages
                .render_status(404, &ctx.parsed.query)
                .await);
        };

        if let Some(rewrote_url) = &ctx.rewrote_url {
            query.insert(
                "_nextRewroteUrl".to_string(),
                QueryValue::Single(rewrote_url.clone()),
            );
        }

        let is_data = ctx.parsed.build_id.is_some();
        let is_amp = query.contains_key("amp");
        let preview = ctx.request.cookie(PREVIEW_BYPASS_COOKIE).is_some();

        let mut key_path = pathname.clone();
        if is_data {
            key_path.push_str(".json");
        }
        let key = ResponseCache::key(&key_path, ctx.parsed.locale.as_deref(), is_amp);
        let key = if preview { None } else { Some(key.as_str()) };

        let render = &self.render;
        let page_for_render = page.clone();
        let cached = self
            .response_cache
            .get_or_render(key, || async move {
                let outcome = render.render(&page_for_render, &query).await?;
                CachedRender::from_outcome(outcome)
            })
            .await?;

        match &*cached {
            CachedRender::Html { body } => Ok(Response::html(body.clone())),
            CachedRender::Json { body } => Ok(Response::json_body(body.clone())),
            CachedRender::Redirect {
                destination,
                status,
            } => Ok(Response::redirect(destination, *status)),
            CachedRender::NotFound => {
                if bubble_no_fallback {
                    return Err(Error::NoFallback);
                }
                Ok(self
                    .error_pages
                    .render_status(404, &ctx.parsed.query)
                    .await)
            }
        }
    }

    /// Apply accumulated headers and release the terminal response.
    fn commit(&self, ctx: &mut RouteContext<'_>, mut response: Response) -> Response {
        for (name, value) in ctx.extra_headers.drain(..) {
            response.add_header(&name, &value);
        }
        response
    }
}

/// Static assets allow only GET and HEAD.
fn method_guard(request: &Request) -> Option<Response> {
    if request.method.eq_ignore_ascii_case("GET") || request.method.eq_ignore_ascii_case("HEAD") {
        None
    } else {
        Some(Response::method_not_allowed("GET, HEAD"))
    }
}
