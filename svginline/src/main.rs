use clap::Parser;
use futures::executor::block_on;
use log::{error, info};
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;
use svginline_lib::dom::dom_tree::{descendants, Document, NodeRef};
use svginline_lib::parser::html::{create_dom_tree, create_dom_tree_with_url};
use svginline_lib::style::css_matcher::{matches_selector_list, parse_selector_list};
use svginline_lib::{CssOptions, ExportOptions, HttpFetcher, ResourceFetcher, StylesheetAccess, SvgExporter};
use url::Url;

const SVGINLINE_INTRO: &str = r#"
     ___ __   ____ _(_)_ __ | (_)_ __   ___
    / __|\ \ / / _` | | '_ \| | | '_ \ / _ \
    \__ \ \ V / (_| | | | | | | | | | |  __/
    |___/  \_/ \__, |_|_| |_|_|_|_| |_|\___|
               |___/
    Self-contained SVG export with fonts, images and CSS inlined.
"#;

#[derive(Parser)]
#[command(name = "svginline")]
#[command(about = "Export an SVG element as a standalone SVG document")]
struct Args {
    /// Input HTML or SVG file, or an http(s) URL.
    input: String,

    /// Output file name. Defaults to stdout.
    #[arg(short, long)]
    output: Option<String>,

    /// Selector of the element to export; the first match is used.
    #[arg(long, default_value = "svg")]
    selector: String,

    /// Location relative references resolve against. Defaults to the input's own location.
    #[arg(long)]
    base_url: Option<String>,

    #[arg(long)]
    width: Option<f64>,

    #[arg(long)]
    height: Option<f64>,

    #[arg(long, default_value_t = 1.0)]
    scale: f64,

    #[arg(long, default_value_t = 0.0)]
    left: f64,

    #[arg(long, default_value_t = 0.0)]
    top: f64,

    /// Omit width/height so the document scales to its container.
    #[arg(long)]
    responsive: bool,

    /// Do not embed any CSS.
    #[arg(long)]
    exclude_css: bool,

    /// Only embed rules that match something in the exported element.
    #[arg(long)]
    exclude_unused_css: bool,

    #[arg(long)]
    background_color: Option<String>,

    /// Also read linked stylesheets from other origins.
    #[arg(long)]
    cross_origin_stylesheets: bool,

    /// Write a base64 data URI instead of the document.
    #[arg(long)]
    data_uri: bool,

    /// Network timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// User-Agent header for http(s) requests.
    #[arg(long)]
    user_agent: Option<String>,

    /// Largest response body accepted, in bytes.
    #[arg(long, default_value_t = 50 * 1024 * 1024)]
    max_size: usize,
}

fn main() {
    env_logger::init();

    // parse the args given in terminal
    let args: Args = Args::parse();
    if args.output.is_some() {
        eprintln!("{}", SVGINLINE_INTRO);
    }

    match run(&args) {
        Ok(result) => match &args.output {
            Some(path) => {
                if let Err(e) = fs::write(path, result) {
                    error!("Error writing {}: {}", path, e);
                    std::process::exit(1);
                }
                info!("Wrote {}", path);
            }
            None => println!("{}", result),
        },
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> Result<String, Box<dyn std::error::Error>> {
    let fetcher = Rc::new(http_fetcher(args));
    let (content, location) = read_input(&args.input, fetcher.as_ref())?;
    let base_url = match &args.base_url {
        Some(base) => Some(Url::parse(base)?),
        None => location,
    };
    let document = match base_url {
        Some(url) => create_dom_tree_with_url(&content, url),
        None => create_dom_tree(&content),
    };
    let element = select(&document, &args.selector)?;

    let access = if args.cross_origin_stylesheets {
        StylesheetAccess::Any
    } else {
        StylesheetAccess::SameOrigin
    };
    let exporter = SvgExporter::with_fetcher(fetcher).with_stylesheet_access(access);
    let mut options = ExportOptions::new()
        .with_origin(args.left, args.top)
        .with_size(args.width, args.height)
        .with_scale(args.scale)
        .with_responsive(args.responsive)
        .with_exclude_css(args.exclude_css)
        .with_css(CssOptions::new().with_exclude_unused_css(args.exclude_unused_css));
    if let Some(color) = &args.background_color {
        options = options.with_background_color(color.as_str());
    }

    let output = if args.data_uri {
        block_on(exporter.svg_as_data_uri(&document, &element, &options))?
    } else {
        block_on(exporter.svg_as_markup(&document, &element, &options))?
    };
    Ok(output)
}

fn http_fetcher(args: &Args) -> HttpFetcher {
    let fetcher = HttpFetcher::new()
        .with_timeout(Duration::from_secs(args.timeout))
        .with_max_size(args.max_size);
    match &args.user_agent {
        Some(agent) => fetcher.with_user_agent(agent.as_str()),
        None => fetcher,
    }
}

fn read_input(
    input: &str,
    fetcher: &dyn ResourceFetcher,
) -> Result<(String, Option<Url>), Box<dyn std::error::Error>> {
    if input.starts_with("http://") || input.starts_with("https://") {
        let url = Url::parse(input)?;
        let resource = block_on(fetcher.fetch(url.as_str()))?;
        info!("Fetched {} ({} bytes)", url, resource.bytes.len());
        return Ok((String::from_utf8_lossy(&resource.bytes).into_owned(), Some(url)));
    }
    let content = fs::read_to_string(input).map_err(|e| format!("Error reading {}: {}", input, e))?;
    let location = fs::canonicalize(Path::new(input))
        .ok()
        .and_then(|path| Url::from_file_path(path).ok());
    Ok((content, location))
}

fn select(document: &Document, selector: &str) -> Result<NodeRef, Box<dyn std::error::Error>> {
    let list = parse_selector_list(selector)?;
    descendants(&document.root)
        .into_iter()
        .find(|node| matches_selector_list(node, &list))
        .ok_or_else(|| format!("no element matches {:?}", selector).into())
}
