use std::io::Read;

use serde::{Deserialize, Deserializer, Serialize};

/// One `(identifier, known name)` pair queued for verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl BatchItem {
    pub fn new(identifier: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            identifier: identifier.into(),
            name: name.map(str::to_string),
        }
    }
}

/// Tabular batch input. Identifiers are kept raw so invalid rows still produce a report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchInput {
    pub items: Vec<BatchItem>,
}

impl BatchInput {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, BatchInputError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);
        let mut items = Vec::new();

        for (index, record) in csv_reader.deserialize::<BatchRow>().enumerate() {
            let row = record.map_err(|source| BatchInputError::Row {
                line: index + 2,
                source,
            })?;
            let Some(identifier) = row.identifier else {
                continue;
            };
            items.push(BatchItem {
                identifier,
                name: row.name,
            });
        }

        if items.is_empty() {
            return Err(BatchInputError::Empty);
        }
        Ok(Self { items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct BatchRow {
    #[serde(
        alias = "cnpj",
        alias = "CNPJ",
        alias = "CPF/CNPJ",
        alias = "Identifier",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    identifier: Option<String>,
    #[serde(
        alias = "razao_social",
        alias = "company",
        alias = "Contratado",
        alias = "Name",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    name: Option<String>,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

#[derive(Debug, thiserror::Error)]
pub enum BatchInputError {
    #[error("batch input line {line} is invalid: {source}")]
    Row {
        line: usize,
        #[source]
        source: csv::Error,
    },
    #[error("batch input has no identifiers")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases_and_preserves_order() {
        let input = "CPF/CNPJ,Contratado,Valor\n\
            11.222.333/0001-81,ACME LTDA,10\n\
            ,ignored,0\n\
            00000000000191,,5\n";
        let batch = BatchInput::from_reader(input.as_bytes()).expect("parses");
        assert_eq!(
            batch.items,
            vec![
                BatchItem::new("11.222.333/0001-81", Some("ACME LTDA")),
                BatchItem::new("00000000000191", None),
            ]
        );
    }

    #[test]
    fn canonical_headers_are_accepted() {
        let input = "identifier,name\n11222333000181,  ACME  \n";
        let batch = BatchInput::from_reader(input.as_bytes()).expect("parses");
        assert_eq!(batch.items[0].name.as_deref(), Some("ACME"));
    }

    #[test]
    fn input_without_identifiers_is_rejected() {
        let input = "name\nACME\n";
        match BatchInput::from_reader(input.as_bytes()) {
            Err(BatchInputError::Empty) => {}
            other => panic!("expected empty batch error, got {other:?}"),
        }
    }
}
