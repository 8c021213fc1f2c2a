//! Fake native host

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use hostbridge_sdk::{
    FieldName, NativeHost, NativeObject, NativeTypeInfo, ObjectId, TypeKind, TypeSummary,
};

struct ObjectRecord {
    id: ObjectId,
    class: FieldName,
    alive: bool,
}

#[derive(Default)]
struct HostState {
    next_addr: usize,
    next_id: u64,
    objects: HashMap<NativeObject, ObjectRecord>,
    native_types: HashMap<FieldName, NativeTypeInfo>,
    parents: HashMap<FieldName, FieldName>,
    generated: HashSet<FieldName>,
    refuse_defaults: HashSet<FieldName>,
    default_objects: Vec<(FieldName, NativeObject)>,
    registered: Vec<TypeSummary>,
    exceptions: Vec<String>,
}

/// In-memory `NativeHost`.
///
/// Object ids are assigned sequentially and survive destruction, so a
/// destroyed object still reports its id to deletion notifications.
#[derive(Clone, Default)]
pub struct FakeHost {
    state: Rc<RefCell<HostState>>,
}

impl FakeHost {
    /// Create an empty host
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a live object of `class`
    pub fn spawn(&self, class: &FieldName) -> NativeObject {
        let mut state = self.state.borrow_mut();
        state.next_addr += 0x100;
        state.next_id += 1;
        let object = NativeObject::from_addr(0x7000_0000 + state.next_addr);
        let record = ObjectRecord {
            id: ObjectId(state.next_id),
            class: class.clone(),
            alive: true,
        };
        state.objects.insert(object, record);
        object
    }

    /// Destroy an object (its id stays queryable)
    pub fn destroy(&self, object: NativeObject) {
        if let Some(record) = self.state.borrow_mut().objects.get_mut(&object) {
            record.alive = false;
        }
    }

    /// Declare a pre-existing native type
    pub fn add_native_type(&self, name: &FieldName, info: NativeTypeInfo) {
        let mut state = self.state.borrow_mut();
        if let Some(parent) = &info.parent {
            state.parents.insert(name.clone(), parent.clone());
        }
        state.native_types.insert(name.clone(), info);
    }

    /// Declare a native class with the given size and parent
    pub fn add_native_class(&self, name: &FieldName, size: usize, parent: Option<&FieldName>) {
        self.add_native_type(
            name,
            NativeTypeInfo {
                kind: TypeKind::Class,
                size,
                alignment: 8,
                parent: parent.cloned(),
                package: format!("/Script/{}", name.namespace()),
            },
        );
    }

    /// Declare a dynamically generated class deriving from `parent`
    pub fn add_generated_class(&self, name: &FieldName, parent: &FieldName) {
        let mut state = self.state.borrow_mut();
        state.generated.insert(name.clone());
        state.parents.insert(name.clone(), parent.clone());
    }

    /// Declare the parent of a class without describing it as native
    pub fn set_parent(&self, class: &FieldName, parent: &FieldName) {
        self.state
            .borrow_mut()
            .parents
            .insert(class.clone(), parent.clone());
    }

    /// Make `construct_default_object` fail for `class`
    pub fn refuse_default_object(&self, class: &FieldName) {
        self.state.borrow_mut().refuse_defaults.insert(class.clone());
    }

    /// Undo `refuse_default_object`
    pub fn allow_default_object(&self, class: &FieldName) {
        self.state.borrow_mut().refuse_defaults.remove(class);
    }

    /// Types published through `register_type`, in order
    pub fn registered_types(&self) -> Vec<TypeSummary> {
        self.state.borrow().registered.clone()
    }

    /// Messages raised through the script-exception channel
    pub fn exceptions(&self) -> Vec<String> {
        self.state.borrow().exceptions.clone()
    }

    /// Default objects constructed so far
    pub fn default_objects(&self) -> Vec<(FieldName, NativeObject)> {
        self.state.borrow().default_objects.clone()
    }
}

impl NativeHost for FakeHost {
    fn object_id(&self, object: NativeObject) -> ObjectId {
        self.state
            .borrow()
            .objects
            .get(&object)
            .map(|r| r.id)
            .unwrap_or(ObjectId(0))
    }

    fn is_valid(&self, object: NativeObject) -> bool {
        self.state
            .borrow()
            .objects
            .get(&object)
            .map(|r| r.alive)
            .unwrap_or(false)
    }

    fn class_of(&self, object: NativeObject) -> Option<FieldName> {
        self.state.borrow().objects.get(&object).map(|r| r.class.clone())
    }

    fn parent_class(&self, class: &FieldName) -> Option<FieldName> {
        self.state.borrow().parents.get(class).cloned()
    }

    fn is_generated_class(&self, class: &FieldName) -> bool {
        self.state.borrow().generated.contains(class)
    }

    fn describe_native_type(&self, name: &FieldName) -> Option<NativeTypeInfo> {
        self.state.borrow().native_types.get(name).cloned()
    }

    fn construct_default_object(&self, class: &FieldName) -> Option<NativeObject> {
        if self.state.borrow().refuse_defaults.contains(class) {
            return None;
        }
        let object = self.spawn(class);
        self.state
            .borrow_mut()
            .default_objects
            .push((class.clone(), object));
        Some(object)
    }

    fn register_type(&self, summary: &TypeSummary) {
        self.state.borrow_mut().registered.push(summary.clone());
    }

    fn raise_script_exception(&self, message: &str) {
        self.state.borrow_mut().exceptions.push(message.to_string());
    }
}
