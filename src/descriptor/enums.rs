use super::{child_path, Comments};
use prost_reflect::{EnumDescriptor, EnumValueDescriptor};

const ENUM_VALUE: i32 = 2;

/// An enum, top-level or hoisted out of a message.
#[derive(Debug, Clone)]
pub struct EnumSpec {
    descriptor: EnumDescriptor,
    prefix: String,
    path: Vec<i32>,
    comment: String,
    values: Vec<EnumValueSpec>,
}

impl EnumSpec {
    pub(super) fn new(
        descriptor: EnumDescriptor,
        prefix: String,
        path: Vec<i32>,
        comments: &Comments,
    ) -> Self {
        let values = descriptor
            .values()
            .enumerate()
            .map(|(i, value)| {
                let value_path = child_path(&path, ENUM_VALUE, i);
                EnumValueSpec {
                    comment: comments.get(&value_path).to_string(),
                    descriptor: value,
                    path: value_path,
                }
            })
            .collect();

        Self {
            comment: comments.get(&path).to_string(),
            descriptor,
            prefix,
            path,
            values,
        }
    }

    pub fn descriptor(&self) -> &EnumDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn full_name(&self) -> &str {
        self.descriptor.full_name()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn path(&self) -> &[i32] {
        &self.path
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn values(&self) -> &[EnumValueSpec] {
        &self.values
    }
}

#[derive(Debug, Clone)]
pub struct EnumValueSpec {
    descriptor: EnumValueDescriptor,
    path: Vec<i32>,
    comment: String,
}

impl EnumValueSpec {
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn number(&self) -> i32 {
        self.descriptor.number()
    }

    pub fn path(&self) -> &[i32] {
        &self.path
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }
}
