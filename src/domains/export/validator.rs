use crate::domains::export::types::*;
use crate::errors::ValidationError;

/// A request whose keys resolved against the static registries
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub data_source: DataSourceKey,
    pub format: ExportFormat,
    pub filters: Filters,
    pub fields: Vec<String>,
    pub options: ExportOptions,
}

impl ValidatedRequest {
    pub fn into_job(self, owner_id: uuid::Uuid) -> ExportJob {
        ExportJob::new(owner_id, self.data_source, self.format, self.filters, self.fields, self.options)
    }
}

/// Admission checks. Pure: no I/O, no row counts.
pub fn validate_request(request: &ExportRequest) -> Result<ValidatedRequest, ValidationError> {
    let format = ExportFormat::parse(&request.format)
        .ok_or_else(|| ValidationError::UnsupportedFormat(request.format.clone()))?;
    let data_source = DataSourceKey::parse(&request.data_source)
        .ok_or_else(|| ValidationError::UnknownDataSource(request.data_source.clone()))?;

    if request.fields.iter().any(|f| f.trim().is_empty()) {
        return Err(ValidationError::invalid_option("fields", "field names must not be blank"));
    }
    request.options.validate()?;

    Ok(ValidatedRequest {
        data_source,
        format,
        filters: request.filters.clone(),
        fields: request.fields.clone(),
        options: request.options.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(source: &str, format: &str) -> ExportRequest {
        ExportRequest {
            data_source: source.into(),
            format: format.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_accepts_every_registered_pair() {
        for format in ExportFormat::ALL {
            for source in DataSourceKey::ALL {
                let validated = validate_request(&request(source.as_str(), format.as_str())).unwrap();
                assert_eq!(validated.format, format);
                assert_eq!(validated.data_source, source);
            }
        }
    }

    #[test]
    fn test_rejects_unknown_keys() {
        assert_eq!(
            validate_request(&request("employees", "docx")).unwrap_err(),
            ValidationError::UnsupportedFormat("docx".into())
        );
        assert_eq!(
            validate_request(&request("payroll", "csv")).unwrap_err(),
            ValidationError::UnknownDataSource("payroll".into())
        );
        // format is checked first
        assert!(matches!(
            validate_request(&request("payroll", "docx")).unwrap_err(),
            ValidationError::UnsupportedFormat(_)
        ));
    }

    #[test]
    fn test_keys_are_matched_without_case() {
        let validated = validate_request(&request("Candidates", "XML")).unwrap();
        assert_eq!(validated.format, ExportFormat::Xml);
        assert_eq!(validated.data_source, DataSourceKey::Candidates);
    }

    #[test]
    fn test_rejects_malformed_options() {
        let mut req = request("employees", "csv");
        req.options.delimiter = Some("||".into());
        assert!(matches!(
            validate_request(&req).unwrap_err(),
            ValidationError::InvalidOption { option, .. } if option == "delimiter"
        ));

        let mut req = request("employees", "csv");
        req.fields = vec!["id".into(), " ".into()];
        assert!(validate_request(&req).is_err());

        let mut req = request("employees", "json");
        req.options.limit = Some(0);
        assert!(validate_request(&req).is_err());
    }
}
