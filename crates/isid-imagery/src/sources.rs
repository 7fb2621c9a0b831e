//! Loading the data source table (`URL,Year` rows).

use crate::{DataSource, Result};
use std::io::Read;
use std::path::Path;

/// Read data sources from a CSV file.
pub fn load_sources<P: AsRef<Path>>(path: P) -> Result<Vec<DataSource>> {
    let file = std::fs::File::open(path)?;
    read_sources(file)
}

/// Read data sources from any reader. Extra columns are ignored; blank URLs
/// are dropped.
pub fn read_sources<R: Read>(reader: R) -> Result<Vec<DataSource>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut sources = Vec::new();
    for record in csv_reader.deserialize::<DataSource>() {
        let source = record?;
        if !source.url.is_empty() {
            sources.push(source);
        }
    }
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_sources() {
        let text = "URL,Year,Notes\n\
                    https://a.example/arcgis/rest/services/Ortho/MapServer,2020,leaf-off\n\
                    https://b.example/arcgis/rest/services/Img/ImageServer , 2018,\n";
        let sources = read_sources(text.as_bytes()).unwrap();
        assert_eq!(
            sources,
            vec![
                DataSource::new("https://a.example/arcgis/rest/services/Ortho/MapServer", 2020),
                DataSource::new("https://b.example/arcgis/rest/services/Img/ImageServer", 2018),
            ]
        );
    }

    #[test]
    fn test_bad_year_is_error() {
        assert!(read_sources("URL,Year\nhttps://a.example,soon\n".as_bytes()).is_err());
    }
}
