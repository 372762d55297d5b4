//! # publ-render
//!
//! Built-in page templates for Publ.
//!
//! Pages are askama templates fed with view models that are computed from
//! the content index before rendering.

pub mod templates;
pub mod views;

pub use templates::{
    render_category, render_entry, render_error, render_login, CategoryTemplate, EntryTemplate,
    ErrorTemplate, LoginTemplate, RenderError, ENTRIES_PER_PAGE,
};
pub use views::{CategoryView, EntryView, NavLink, SiteContext, TemplateInfo, Timestamp, UserView};
