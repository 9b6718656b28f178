use kestrel_vm::{
    signature_to_type_name, ClassInfo, ObjectId, ThreadId, Vm, VmError, VmValue, TAG_ARRAY,
    TAG_OBJECT, TAG_STRING,
};
use serde::{Deserialize, Serialize};

const STRING_SIGNATURE: &str = "Ljava/lang/String;";

/// Wire-model view of a target value.
///
/// Reference kinds list their fields (or only their length, for arrays) but
/// never their contents; those are fetched one at a time on demand.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum DebugValue {
    Null {
        type_name: String,
    },
    Primitive {
        summary: String,
        type_name: String,
        thread_id: ThreadId,
    },
    String {
        summary: String,
        fields: Vec<DebugClassField>,
        type_name: String,
        object_id: ObjectId,
        thread_id: ThreadId,
    },
    Object {
        fields: Vec<DebugClassField>,
        type_name: String,
        object_id: ObjectId,
        thread_id: ThreadId,
    },
    Array {
        length: usize,
        type_name: String,
        element_type_name: String,
        thread_id: ThreadId,
        object_id: ObjectId,
    },
    Unrepresentable {
        type_name: String,
    },
}

impl DebugValue {
    pub fn type_name(&self) -> &str {
        match self {
            DebugValue::Null { type_name }
            | DebugValue::Primitive { type_name, .. }
            | DebugValue::String { type_name, .. }
            | DebugValue::Object { type_name, .. }
            | DebugValue::Array { type_name, .. }
            | DebugValue::Unrepresentable { type_name } => type_name,
        }
    }

    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            DebugValue::String { object_id, .. }
            | DebugValue::Object { object_id, .. }
            | DebugValue::Array { object_id, .. } => Some(*object_id),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugClassField {
    pub index: usize,
    pub name: String,
    /// Left empty at conversion time; filled by an explicit field fetch.
    pub value: Option<Box<DebugValue>>,
    pub object_id: ObjectId,
}

#[derive(Clone, Debug)]
pub struct ValueInspector {
    max_string_len: usize,
    array_sample_size: usize,
}

impl Default for ValueInspector {
    fn default() -> Self {
        Self {
            max_string_len: 50,
            array_sample_size: 3,
        }
    }
}

impl ValueInspector {
    pub fn new(max_string_len: usize) -> Self {
        Self {
            max_string_len,
            ..Self::default()
        }
    }

    /// Convert `value`, read on `thread`, into a [`DebugValue`].
    ///
    /// `static_signature` is the declared type of the slot the value came
    /// from; it only matters for nulls, which carry no runtime type.
    pub fn to_debug_value(
        &self,
        vm: &mut dyn Vm,
        value: &VmValue,
        static_signature: Option<&str>,
        thread: ThreadId,
    ) -> kestrel_vm::Result<DebugValue> {
        if let Some((summary, type_name)) = primitive_summary(value) {
            return Ok(DebugValue::Primitive {
                summary,
                type_name: type_name.to_string(),
                thread_id: thread,
            });
        }

        match value {
            VmValue::Null | VmValue::Object { id: 0, .. } => Ok(DebugValue::Null {
                type_name: static_signature
                    .map(signature_to_type_name)
                    .unwrap_or_else(|| "null".to_string()),
            }),
            VmValue::Object { id, tag } => self.reference_value(vm, *id, *tag, thread),
            _ => Ok(DebugValue::Unrepresentable {
                type_name: "void".to_string(),
            }),
        }
    }

    /// Convert an object known only by id.
    pub fn object_value(
        &self,
        vm: &mut dyn Vm,
        object: ObjectId,
        thread: ThreadId,
    ) -> kestrel_vm::Result<DebugValue> {
        let class = vm.object_reference_type(object)?;
        self.reference_value(vm, object, tag_for_class(&class), thread)
    }

    /// Fetch and convert one named field of `object`.
    pub fn field_value(
        &self,
        vm: &mut dyn Vm,
        object: ObjectId,
        name: &str,
        thread: ThreadId,
    ) -> kestrel_vm::Result<Option<DebugValue>> {
        let class = vm.object_reference_type(object)?;
        let Some(field) = vm
            .all_fields(class.type_id)?
            .into_iter()
            .find(|field| field.name == name)
        else {
            return Ok(None);
        };
        let value = vm
            .object_get_values(object, &[field.field_id])?
            .into_iter()
            .next()
            .unwrap_or(VmValue::Null);
        self.to_debug_value(vm, &value, Some(&field.signature), thread)
            .map(Some)
    }

    pub fn array_element(
        &self,
        vm: &mut dyn Vm,
        array: ObjectId,
        index: usize,
        thread: ThreadId,
    ) -> kestrel_vm::Result<Option<DebugValue>> {
        if index >= vm.array_length(array)? {
            return Ok(None);
        }
        let class = vm.object_reference_type(array)?;
        let element_signature = class.signature.strip_prefix('[').map(str::to_string);
        let Some(value) = vm.array_get_values(array, index, 1)?.into_iter().next() else {
            return Ok(None);
        };
        self.to_debug_value(vm, &value, element_signature.as_deref(), thread)
            .map(Some)
    }

    /// One-line rendering used for backtrace locals.
    pub fn summary(&self, vm: &mut dyn Vm, value: &VmValue) -> kestrel_vm::Result<String> {
        self.summary_at(vm, value, 0)
    }

    fn summary_at(
        &self,
        vm: &mut dyn Vm,
        value: &VmValue,
        depth: usize,
    ) -> kestrel_vm::Result<String> {
        if let Some((summary, _)) = primitive_summary(value) {
            return Ok(summary);
        }
        let VmValue::Object { id, tag } = value else {
            return Ok(match value {
                VmValue::Void => "void".to_string(),
                _ => "null".to_string(),
            });
        };
        if *id == 0 {
            return Ok("null".to_string());
        }

        match *tag {
            TAG_STRING => Ok(format!("\"{}\"", self.preview(&vm.string_value(*id)?))),
            TAG_ARRAY if depth > 0 => Ok("Array[...]".to_string()),
            TAG_ARRAY => {
                let length = vm.array_length(*id)?;
                let sample = vm.array_get_values(*id, 0, length.min(self.array_sample_size))?;
                let mut parts = Vec::with_capacity(sample.len() + 1);
                for element in &sample {
                    parts.push(self.summary_at(vm, element, depth + 1)?);
                }
                if length > sample.len() {
                    parts.push("...".to_string());
                }
                Ok(format!("Array[{}]", parts.join(", ")))
            }
            _ => {
                let class = vm.object_reference_type(*id)?;
                Ok(format!("Instance of {}", simple_type_name(&class.name())))
            }
        }
    }

    fn reference_value(
        &self,
        vm: &mut dyn Vm,
        object: ObjectId,
        tag: u8,
        thread: ThreadId,
    ) -> kestrel_vm::Result<DebugValue> {
        let class = vm.object_reference_type(object)?;
        match tag {
            TAG_STRING => {
                let summary = self.preview(&vm.string_value(object)?);
                Ok(DebugValue::String {
                    summary,
                    fields: self.field_list(vm, &class, object)?,
                    type_name: class.name(),
                    object_id: object,
                    thread_id: thread,
                })
            }
            TAG_ARRAY => Ok(DebugValue::Array {
                length: vm.array_length(object)?,
                element_type_name: class
                    .component_type_name()
                    .unwrap_or_else(|| "<unknown>".to_string()),
                type_name: class.name(),
                thread_id: thread,
                object_id: object,
            }),
            _ => Ok(DebugValue::Object {
                fields: self.field_list(vm, &class, object)?,
                type_name: class.name(),
                object_id: object,
                thread_id: thread,
            }),
        }
    }

    fn field_list(
        &self,
        vm: &mut dyn Vm,
        class: &ClassInfo,
        object: ObjectId,
    ) -> kestrel_vm::Result<Vec<DebugClassField>> {
        let fields = match vm.all_fields(class.type_id) {
            Ok(fields) => fields,
            Err(VmError::Disconnected) => return Err(VmError::Disconnected),
            Err(err) => {
                tracing::debug!(target: "kestrel.debug", type_name = %class.name(), error = %err, "no field list");
                Vec::new()
            }
        };
        Ok(fields
            .into_iter()
            .enumerate()
            .map(|(index, field)| DebugClassField {
                index,
                name: field.name,
                value: None,
                object_id: object,
            })
            .collect())
    }

    fn preview(&self, value: &str) -> String {
        value.chars().take(self.max_string_len).collect()
    }
}

/// The object tag a class's instances carry.
pub(crate) fn tag_for_class(class: &ClassInfo) -> u8 {
    if class.is_array() {
        TAG_ARRAY
    } else if class.signature == STRING_SIGNATURE {
        TAG_STRING
    } else {
        TAG_OBJECT
    }
}

fn primitive_summary(value: &VmValue) -> Option<(String, &'static str)> {
    Some(match value {
        VmValue::Boolean(v) => (v.to_string(), "boolean"),
        VmValue::Byte(v) => (v.to_string(), "byte"),
        VmValue::Char(v) => {
            let ch = char::from_u32(u32::from(*v)).unwrap_or('\u{FFFD}');
            (format!("'{ch}'"), "char")
        }
        VmValue::Short(v) => (v.to_string(), "short"),
        VmValue::Int(v) => (v.to_string(), "int"),
        VmValue::Long(v) => (format!("{v}L"), "long"),
        VmValue::Float(v) => (format!("{}F", java_float(f64::from(*v))), "float"),
        VmValue::Double(v) => (format!("{}D", java_float(*v)), "double"),
        _ => return None,
    })
}

/// Floating-point text the way the target would print it (`1.0`, `NaN`).
fn java_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        format!("{value:?}")
    }
}

fn simple_type_name(full: &str) -> &str {
    let tail = full.rsplit('.').next().unwrap_or(full);
    tail.rsplit('$').next().unwrap_or(tail)
}
