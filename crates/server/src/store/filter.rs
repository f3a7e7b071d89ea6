/// Typed predicate rendered into the store's formula language
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// A link field contains the given record id
    LinksTo { field: &'static str, id: String },
    /// A scalar field equals the given value exactly
    Equals { field: &'static str, value: String },
    And(Vec<Filter>),
}

impl Filter {
    pub fn links_to(field: &'static str, id: impl Into<String>) -> Self {
        Filter::LinksTo {
            field,
            id: id.into(),
        }
    }

    pub fn equals(field: &'static str, value: impl Into<String>) -> Self {
        Filter::Equals {
            field,
            value: value.into(),
        }
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut parts) => {
                parts.push(other);
                Filter::And(parts)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    pub fn to_formula(&self) -> String {
        match self {
            Filter::LinksTo { field, id } => {
                format!("FIND('{}', ARRAYJOIN({{{}}})) > 0", escape(id), field)
            }
            Filter::Equals { field, value } => format!("{{{}}}='{}'", field, escape(value)),
            Filter::And(parts) => {
                let rendered: Vec<String> = parts.iter().map(Filter::to_formula).collect();
                format!("AND({})", rendered.join(", "))
            }
        }
    }
}

/// Backslashes first, so an escaped quote cannot be split
fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
