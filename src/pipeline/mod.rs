//! Pipeline stages for rendering wiki markup through the document compiler.
//!
//! Each submodule implements one stage; [`crate::render`] runs them in order.
//!
//! ## Data Flow
//!
//! ```text
//! directives ──▶ workspace ──▶ figures ──▶ compile ──▶ assemble
//! (options)      (stage dir)   (wiki API)  (sphinx)    (HTML + assets)
//! ```
//!
//! 1. [`directives`]: strip `<rst-options: …/>` lines into [`directives::DocumentOptions`]
//! 2. [`workspace`]: fingerprint the text and stage it in its own directory
//! 3. [`figures`]: download every `images/…` figure the text references
//! 4. [`compile`]: optionally sync the shared source tree, then run the
//!    compiler; the only stage that spawns processes
//! 5. [`assemble`]: read the compiled page objects, add the TOC, rewrite
//!    asset URLs, and publish compiled images

pub mod assemble;
pub mod compile;
pub mod directives;
pub mod figures;
pub mod workspace;
