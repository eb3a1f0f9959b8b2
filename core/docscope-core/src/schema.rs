use crate::error::{Error, Result};
use tantivy::schema::{Field, NumericOptions, Schema, SchemaBuilder, STORED, STRING, TEXT};

pub const PATH: &str = "path";
pub const FILENAME: &str = "filename";
pub const CONTENTS: &str = "contents";
pub const TITLE: &str = "title";
pub const AUTHOR: &str = "author";
pub const LAST_MODIFIED: &str = "last_modified";
pub const PARSED_BY: &str = "parsed_by";

pub fn build_schema() -> Schema {
    let mut builder = SchemaBuilder::default();

    // Raw (untokenized) so a document can be deleted by its exact stored path.
    builder.add_text_field(PATH, STRING | STORED);
    builder.add_text_field(FILENAME, TEXT);
    builder.add_text_field(CONTENTS, TEXT);
    builder.add_text_field(TITLE, TEXT | STORED);
    builder.add_text_field(AUTHOR, TEXT | STORED);

    let mtime = NumericOptions::default().set_stored();
    builder.add_i64_field(LAST_MODIFIED, mtime);

    builder.add_text_field(PARSED_BY, STRING | STORED);

    builder.build()
}

#[derive(Debug, Clone, Copy)]
pub struct IndexFields {
    pub path: Field,
    pub filename: Field,
    pub contents: Field,
    pub title: Field,
    pub author: Field,
    pub last_modified: Field,
    pub parsed_by: Field,
}

impl IndexFields {
    pub fn resolve(schema: &Schema) -> Result<Self> {
        Ok(Self {
            path: field(schema, PATH)?,
            filename: field(schema, FILENAME)?,
            contents: field(schema, CONTENTS)?,
            title: field(schema, TITLE)?,
            author: field(schema, AUTHOR)?,
            last_modified: field(schema, LAST_MODIFIED)?,
            parsed_by: field(schema, PARSED_BY)?,
        })
    }
}

fn field(schema: &Schema, name: &str) -> Result<Field> {
    schema.get_field(name).map_err(Error::Index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contents_is_indexed_but_not_stored() {
        let schema = build_schema();
        let fields = IndexFields::resolve(&schema).unwrap();
        let contents = schema.get_field_entry(fields.contents);
        assert!(contents.is_indexed());
        assert!(!contents.is_stored());
        assert!(schema.get_field_entry(fields.path).is_stored());
        assert!(schema.get_field_entry(fields.title).is_stored());
    }
}
