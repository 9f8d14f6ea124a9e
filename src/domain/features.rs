//! Feature matrices exchanged with the feature preparer and the model.

/// Model input: 2-D rows for flat models, 3-D windows for sequential models.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureMatrix {
    /// samples x features
    Flat(Vec<Vec<f64>>),
    /// samples x sequence length x features
    Sequences(Vec<Vec<Vec<f64>>>),
}

impl FeatureMatrix {
    pub fn empty(sequential: bool) -> Self {
        if sequential {
            FeatureMatrix::Sequences(Vec::new())
        } else {
            FeatureMatrix::Flat(Vec::new())
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FeatureMatrix::Flat(rows) => rows.len(),
            FeatureMatrix::Sequences(samples) => samples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sequential(&self) -> bool {
        matches!(self, FeatureMatrix::Sequences(_))
    }

    /// Width of the innermost feature vector, 0 when empty.
    pub fn feature_count(&self) -> usize {
        match self {
            FeatureMatrix::Flat(rows) => rows.first().map_or(0, Vec::len),
            FeatureMatrix::Sequences(samples) => samples
                .first()
                .and_then(|s| s.first())
                .map_or(0, Vec::len),
        }
    }
}

/// Feature matrix plus the auxiliary target series.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedFeatures {
    pub matrix: FeatureMatrix,
    pub targets: Vec<f64>,
}

impl PreparedFeatures {
    pub fn empty(sequential: bool) -> Self {
        Self {
            matrix: FeatureMatrix::empty(sequential),
            targets: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.matrix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrix.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shapes() {
        let flat = FeatureMatrix::Flat(vec![vec![1.0, 2.0, 3.0]; 4]);
        assert_eq!(flat.len(), 4);
        assert_eq!(flat.feature_count(), 3);
        assert!(!flat.is_sequential());

        let seq = FeatureMatrix::Sequences(vec![vec![vec![0.0; 5]; 10]; 2]);
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.feature_count(), 5);
        assert!(seq.is_sequential());
    }

    #[test]
    fn empty_matrix() {
        let prepared = PreparedFeatures::empty(true);
        assert!(prepared.is_empty());
        assert!(prepared.matrix.is_sequential());
        assert_eq!(prepared.matrix.feature_count(), 0);
    }
}
