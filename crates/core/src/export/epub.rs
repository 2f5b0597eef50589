use epub_builder::{EpubBuilder, EpubContent, ReferenceType, ZipLibrary};
use std::fs::{self, File};
use std::path::Path;

use super::{markdown_to_html, ExportError};
use crate::book::BookState;

fn epub_error(err: impl std::fmt::Display) -> ExportError {
    ExportError::Epub(err.to_string())
}

fn chapter_document(title: &str, lang: &str, body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\" xml:lang=\"{lang}\" lang=\"{lang}\">\n\
         <head><title>{title}</title></head>\n\
         <body>\n{body}</body>\n</html>\n",
        title = html_escape::encode_text(title),
    )
}

/// Void elements must self-close in XHTML.
fn to_xhtml(html: &str) -> String {
    html.replace("<br>", "<br />").replace("<hr>", "<hr />")
}

pub(super) fn write_epub(state: &BookState, path: &Path) -> Result<(), ExportError> {
    let lang = state.language.code();
    let mut builder = EpubBuilder::new(ZipLibrary::new().map_err(epub_error)?).map_err(epub_error)?;
    builder
        .metadata("title", state.title.as_str())
        .map_err(epub_error)?
        .metadata("lang", lang)
        .map_err(epub_error)?;

    for (index, chapter) in state.book.iter().enumerate() {
        let document = chapter_document(
            &chapter.title,
            lang,
            &to_xhtml(&markdown_to_html(&chapter.content)),
        );
        builder
            .add_content(
                EpubContent::new(format!("chapter_{}.xhtml", index + 1), document.as_bytes())
                    .title(chapter.title.as_str())
                    .reftype(ReferenceType::Text),
            )
            .map_err(epub_error)?;
    }
    builder.inline_toc();

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ExportError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let mut file = File::create(path).map_err(|source| ExportError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    builder.generate(&mut file).map_err(epub_error)
}
