//! The project operator (spec §4.4): decompose each child tuple into its
//! per-attribute slots and reassemble a narrower tuple, with a freshly
//! recomputed null bitmap rather than slicing the wire form directly.

use crate::error::Result;
use crate::types::{Descriptor, Tuple};

use super::{project_descriptor, project_tuple, TupleIterator};

pub struct Project<'a> {
    child: Box<dyn TupleIterator + 'a>,
    names: Vec<String>,
    out_descriptor: Descriptor,
}

impl<'a> Project<'a> {
    pub fn new(child: Box<dyn TupleIterator + 'a>, names: Vec<String>) -> Result<Self> {
        let out_descriptor = project_descriptor(child.attributes(), &names)?;
        Ok(Self { child, names, out_descriptor })
    }
}

impl<'a> TupleIterator for Project<'a> {
    fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        match self.child.next_tuple()? {
            Some(t) => {
                let source = self.child.attributes();
                Ok(Some(project_tuple(source, &self.names, &t)?))
            }
            None => Ok(None),
        }
    }

    fn attributes(&self) -> &Descriptor {
        &self.out_descriptor
    }

    fn close(&mut self) -> Result<()> {
        self.child.close()
    }

    fn rewind(&mut self) -> Result<()> {
        self.child.rewind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttrType, Attribute, Value};

    struct Vecs {
        rows: std::vec::IntoIter<Tuple>,
        descriptor: Descriptor,
    }

    impl TupleIterator for Vecs {
        fn next_tuple(&mut self) -> Result<Option<Tuple>> {
            Ok(self.rows.next())
        }
        fn attributes(&self) -> &Descriptor {
            &self.descriptor
        }
    }

    #[test]
    fn keeps_only_requested_columns_in_requested_order() {
        let descriptor = vec![
            Attribute::new("a", AttrType::Int, 4),
            Attribute::new("b", AttrType::Varchar, 8),
            Attribute::new("c", AttrType::Real, 4),
        ];
        let rows = vec![Tuple::new(vec![Value::Int(1), Value::Varchar(b"x".to_vec()), Value::Real(2.5)])];
        let child: Box<dyn TupleIterator> = Box::new(Vecs { rows: rows.into_iter(), descriptor });
        let mut p = Project::new(child, vec!["c".to_string(), "a".to_string()]).unwrap();
        let t = p.next_tuple().unwrap().unwrap();
        assert_eq!(t.values, vec![Value::Real(2.5), Value::Int(1)]);
        assert!(p.next_tuple().unwrap().is_none());
    }

    #[test]
    fn unknown_column_is_rejected_at_construction() {
        let descriptor = vec![Attribute::new("a", AttrType::Int, 4)];
        let child: Box<dyn TupleIterator> = Box::new(Vecs { rows: Vec::new().into_iter(), descriptor });
        assert!(Project::new(child, vec!["nope".to_string()]).is_err());
    }
}
