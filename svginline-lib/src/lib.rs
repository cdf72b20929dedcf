//! Export an SVG element of a parsed page as a standalone SVG document, with the fonts, images and
//! stylesheet rules it depends on embedded inline.
//!
//! ```no_run
//! use futures::executor::block_on;
//! use svginline_lib::dom::dom_tree::descendants_by_tag;
//! use svginline_lib::parser::html::create_dom_tree;
//! use svginline_lib::{ExportOptions, SvgExporter};
//!
//! let doc = create_dom_tree(r#"<svg viewBox="0 0 10 10"><circle r="5"/></svg>"#);
//! let svg = descendants_by_tag(&doc.root, "svg").remove(0);
//! let markup = block_on(SvgExporter::new().svg_as_markup(&doc, &svg, &ExportOptions::new()))?;
//! # Ok::<(), svginline_lib::Error>(())
//! ```

pub mod canvas;
pub mod dimensions;
pub mod dom;
pub mod encoding;
pub mod error;
pub mod export;
pub mod fetch;
pub mod fonts;
pub mod images;
pub mod parser;
pub mod style;

pub use dimensions::{Dimensions, Geometry, ResolvedDimensions, StaticGeometry};
pub use error::{Error, FailurePolicy, Result};
pub use export::{ExportOptions, PreparedSvg, SvgExporter, DOCTYPE};
pub use fetch::{FetchError, HttpFetcher, MemoryFetcher, ResourceFetcher};
pub use fonts::{FontCache, FontDescriptor};
pub use style::scanner::CssOptions;
pub use style::sheets::{StylesheetAccess, StylesheetCache};
