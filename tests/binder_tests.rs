//! Binding host types: constructors, methods, members, operators and inheritance.

#![cfg(feature = "macros")]

use std::cell::Cell;

use luaw::{
    Config, ConstructorKind, Error, Lua, Operators, RegistrationError, UserType,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq, UserType)]
#[luaw(operators(add, eq))]
struct Vec2 {
    x: f64,
    y: f64,
}

impl std::ops::Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2 {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

#[derive(Debug, Clone, Default, UserType)]
struct Counter {
    count: i32,
}

#[derive(Debug, Clone, UserType)]
struct Animal {
    legs: u32,
}

#[derive(Debug, Clone, UserType)]
struct Dog {
    #[luaw(parent)]
    animal: Animal,
    name: String,
}

fn bind_vec2(lua: &Lua) {
    lua.bind::<Vec2>()
        .unwrap()
        .add_constructor(|x: f64, y: f64| Vec2 { x, y })
        .unwrap()
        .add_method("length", |v: &Vec2| (v.x * v.x + v.y * v.y).sqrt())
        .unwrap()
        .add_member("x", |v: &mut Vec2| &mut v.x)
        .unwrap()
        .add_member("y", |v: &mut Vec2| &mut v.y)
        .unwrap()
        .add_static_method("zero", || Vec2 { x: 0.0, y: 0.0 })
        .unwrap()
        .add_metamethod("__tostring", |v: &Vec2| format!("Vec2({}, {})", v.x, v.y))
        .unwrap()
        .add_detected_operators()
        .unwrap();
}

fn bind_animals(lua: &Lua) {
    lua.bind::<Animal>()
        .unwrap()
        .add_constructor(|legs: u32| Animal { legs })
        .unwrap()
        .add_method("legs", |a: &Animal| a.legs)
        .unwrap()
        .add_method("speak", |_: &Animal| "...")
        .unwrap();

    lua.bind::<Dog>()
        .unwrap()
        .add_parent_type()
        .unwrap()
        .add_constructor(|name: String| Dog {
            animal: Animal { legs: 4 },
            name,
        })
        .unwrap()
        .add_method("speak", |_: &Dog| "woof")
        .unwrap()
        .add_method("name", |d: &Dog| d.name.clone())
        .unwrap();
}

#[test]
fn test_constructor_and_method() {
    init_tracing();
    let lua = Lua::new().unwrap();
    bind_vec2(&lua);
    lua.exec("v = Vec2(3, 4) len = v:length()").unwrap();

    assert_eq!(lua.get_global::<f64>("len").unwrap(), 5.0);
    let v: Vec2 = lua.get_global("v").unwrap();
    assert_eq!(v, Vec2 { x: 3.0, y: 4.0 });
}

#[test]
fn test_member_read_and_write_by_arity() {
    let lua = Lua::new().unwrap();
    bind_vec2(&lua);
    lua.exec("v = Vec2(1, 2) before = v:x() v:x(10) after = v:x()")
        .unwrap();

    assert_eq!(lua.get_global::<f64>("before").unwrap(), 1.0);
    assert_eq!(lua.get_global::<f64>("after").unwrap(), 10.0);
    assert_eq!(lua.get_global::<Vec2>("v").unwrap().x, 10.0);

    let err = lua.exec("v:y('wide')").unwrap_err();
    assert!(
        err.to_string()
            .ends_with("bad argument #2 to 'y' (number expected, got string)"),
        "{err}"
    );
}

#[test]
fn test_host_value_pushed_as_userdata() {
    let lua = Lua::new().unwrap();
    bind_vec2(&lua);
    lua.set_global("p", Vec2 { x: 6.0, y: 8.0 }).unwrap();
    lua.exec("plen = p:length()").unwrap();

    assert_eq!(lua.get_global::<f64>("plen").unwrap(), 10.0);
}

#[test]
fn test_static_method_and_metamethod() {
    let lua = Lua::new().unwrap();
    bind_vec2(&lua);
    lua.exec("z = Vec2.zero() zx = z:x() text = tostring(Vec2(1, 2))")
        .unwrap();

    assert_eq!(lua.get_global::<f64>("zx").unwrap(), 0.0);
    assert_eq!(lua.get_global::<String>("text").unwrap(), "Vec2(1, 2)");
}

#[test]
fn test_declared_operators() {
    let lua = Lua::new().unwrap();
    bind_vec2(&lua);
    lua.exec(
        r#"
        sum = Vec2(1, 2) + Vec2(3, 4)
        sx, sy = sum:x(), sum:y()
        same = Vec2(1, 1) == Vec2(1, 1)
        different = Vec2(1, 1) == Vec2(1, 2)
        "#,
    )
    .unwrap();

    assert_eq!(lua.get_global::<f64>("sx").unwrap(), 4.0);
    assert_eq!(lua.get_global::<f64>("sy").unwrap(), 6.0);
    assert!(lua.get_global::<bool>("same").unwrap());
    assert!(!lua.get_global::<bool>("different").unwrap());

    let descriptor = lua.type_descriptor("Vec2").unwrap();
    assert_eq!(descriptor.operators(), Operators::ADD | Operators::EQ);
}

#[test]
fn test_equality_with_another_type_is_false() {
    let lua = Lua::new().unwrap();
    bind_vec2(&lua);
    lua.bind::<Counter>()
        .unwrap()
        .add_constructor_with_default(|count: i32| Counter { count })
        .unwrap();
    lua.exec(
        r#"
        v = Vec2(1, 1)
        left = v == Counter(1)
        right = Counter(1) == v
        unequal = v ~= io.stdout
        "#,
    )
    .unwrap();

    assert!(!lua.get_global::<bool>("left").unwrap());
    assert!(!lua.get_global::<bool>("right").unwrap());
    assert!(lua.get_global::<bool>("unequal").unwrap());
}

#[test]
fn test_absent_operators_fail_in_the_runtime() {
    let lua = Lua::new().unwrap();
    bind_vec2(&lua);

    let err = lua.exec("product = Vec2(1, 1) * Vec2(2, 2)").unwrap_err();
    assert!(err.is_script());
    assert!(err.to_string().contains("attempt to perform arithmetic"), "{err}");

    let err = lua.exec("less = Vec2(1, 1) < Vec2(2, 2)").unwrap_err();
    assert!(err.to_string().contains("attempt to compare"), "{err}");
}

#[test]
fn test_receiver_is_checked() {
    let lua = Lua::new().unwrap();
    bind_vec2(&lua);

    let err = lua.exec("Vec2.length(5)").unwrap_err();
    assert!(
        err.to_string()
            .ends_with("bad argument #1 to 'length' (Vec2 expected, got number)"),
        "{err}"
    );
}

#[test]
fn test_constructor_with_default() {
    let lua = Lua::new().unwrap();
    lua.bind::<Counter>()
        .unwrap()
        .add_constructor_with_default(|start: i32| Counter { count: start })
        .unwrap()
        .add_method_mut("increment", |c: &mut Counter| {
            c.count += 1;
            c.count
        })
        .unwrap();
    lua.exec("a = Counter():increment() b = Counter(5):increment()")
        .unwrap();

    assert_eq!(lua.get_global::<i32>("a").unwrap(), 1);
    assert_eq!(lua.get_global::<i32>("b").unwrap(), 6);
    assert_eq!(
        lua.type_descriptor("Counter").unwrap().constructor(),
        ConstructorKind::WithDefault
    );
}

#[test]
fn test_second_constructor_overwrites_first() {
    init_tracing();
    let lua = Lua::new().unwrap();
    lua.bind::<Counter>()
        .unwrap()
        .add_constructor(|| Counter { count: 1 })
        .unwrap()
        .add_constructor(|| Counter { count: 100 })
        .unwrap()
        .add_member("count", |c: &mut Counter| &mut c.count)
        .unwrap();
    lua.exec("n = Counter():count()").unwrap();

    assert_eq!(lua.get_global::<i32>("n").unwrap(), 100);
    assert_eq!(
        lua.type_descriptor("Counter").unwrap().constructor(),
        ConstructorKind::Explicit
    );
}

#[test]
fn test_type_without_constructor_cannot_be_called() {
    let lua = Lua::new().unwrap();
    lua.bind::<Counter>().unwrap();

    let err = lua.exec("c = Counter()").unwrap_err();
    assert!(err.to_string().contains("attempt to call"), "{err}");
}

#[test]
fn test_conflicting_borrows_are_reported() {
    let lua = Lua::new().unwrap();
    lua.bind::<Counter>()
        .unwrap()
        .add_constructor(|count: i32| Counter { count })
        .unwrap()
        .add_method_mut("absorb", |c: &mut Counter, other: Counter| {
            c.count += other.count;
            c.count
        })
        .unwrap();

    lua.exec("c = Counter(1) d = Counter(2) total = c:absorb(d)")
        .unwrap();
    assert_eq!(lua.get_global::<i32>("total").unwrap(), 3);

    let err = lua.exec("c:absorb(c)").unwrap_err();
    assert!(
        err.to_string()
            .ends_with("bad argument #2 to 'absorb' (Counter is already mutably borrowed)"),
        "{err}"
    );

    // The failed call released its borrow.
    lua.exec("again = c:absorb(d)").unwrap();
    assert_eq!(lua.get_global::<i32>("again").unwrap(), 5);
}

#[test]
fn test_inherited_methods_and_overrides() {
    let lua = Lua::new().unwrap();
    bind_animals(&lua);
    lua.exec(
        r#"
        local dog = Dog("rex")
        dog_legs = dog:legs()
        dog_says = dog:speak()
        dog_name = dog:name()
        local cat = Animal(3)
        cat_legs = cat:legs()
        cat_says = cat:speak()
        "#,
    )
    .unwrap();

    assert_eq!(lua.get_global::<u32>("dog_legs").unwrap(), 4);
    assert_eq!(lua.get_global::<String>("dog_says").unwrap(), "woof");
    assert_eq!(lua.get_global::<String>("dog_name").unwrap(), "rex");
    assert_eq!(lua.get_global::<u32>("cat_legs").unwrap(), 3);
    assert_eq!(lua.get_global::<String>("cat_says").unwrap(), "...");
    assert_eq!(lua.type_descriptor("Dog").unwrap().parent(), Some("Animal"));
}

#[test]
fn test_override_registered_later_applies_to_existing_objects() {
    let lua = Lua::new().unwrap();
    lua.bind::<Animal>()
        .unwrap()
        .add_method("speak", |_: &Animal| "...")
        .unwrap();
    lua.bind::<Dog>()
        .unwrap()
        .add_parent_type()
        .unwrap()
        .add_constructor(|name: String| Dog {
            animal: Animal { legs: 4 },
            name,
        })
        .unwrap();

    lua.exec("dog = Dog('rex') before = dog:speak()").unwrap();
    assert_eq!(lua.get_global::<String>("before").unwrap(), "...");

    lua.bind::<Dog>()
        .unwrap()
        .add_method("speak", |d: &Dog| format!("{} says woof", d.name))
        .unwrap();

    lua.exec("after = dog:speak() fresh = Dog('fido'):speak()").unwrap();
    assert_eq!(lua.get_global::<String>("after").unwrap(), "rex says woof");
    assert_eq!(lua.get_global::<String>("fresh").unwrap(), "fido says woof");

    lua.exec("generic = Animal.speak(dog)").unwrap();
    assert_eq!(lua.get_global::<String>("generic").unwrap(), "...");
}

#[test]
fn test_child_accepted_where_parent_expected() {
    let lua = Lua::new().unwrap();
    bind_animals(&lua);
    lua.register_function("legs_of", |a: Animal| a.legs).unwrap();
    lua.exec("from_dog = legs_of(Dog('x')) from_animal = legs_of(Animal(6))")
        .unwrap();

    assert_eq!(lua.get_global::<u32>("from_dog").unwrap(), 4);
    assert_eq!(lua.get_global::<u32>("from_animal").unwrap(), 6);

    let err = lua.exec("Dog.name(Animal(2))").unwrap_err();
    assert!(
        err.to_string()
            .ends_with("bad argument #1 to 'name' (Dog expected, got Animal)"),
        "{err}"
    );
}

#[test]
fn test_parent_must_be_declared_first() {
    let lua = Lua::new().unwrap();

    let err = lua.bind::<Dog>().unwrap().add_parent_type().err().unwrap();
    assert!(matches!(
        err,
        Error::Registration(RegistrationError::ParentNotDeclared {
            child: "Dog",
            parent: "Animal"
        })
    ));
}

#[test]
fn test_linking_the_same_parent_twice_is_a_no_op() {
    let lua = Lua::new().unwrap();
    bind_animals(&lua);

    lua.bind::<Dog>().unwrap().add_parent_type().unwrap();
    assert_eq!(lua.type_descriptor("Dog").unwrap().parent(), Some("Animal"));
}

mod namesake {
    use luaw::UserType;

    #[derive(Clone, UserType)]
    #[luaw(name = "Vec2")]
    pub struct OtherVec2;
}

#[test]
fn test_registration_is_idempotent_per_type() {
    let lua = Lua::new().unwrap();
    bind_vec2(&lua);
    lua.bind::<Vec2>().unwrap();

    let err = lua.bind::<namesake::OtherVec2>().err().unwrap();
    assert!(matches!(
        err,
        Error::Registration(RegistrationError::NameConflict { name: "Vec2" })
    ));

    // Vec2 still works after the rejected namesake.
    lua.exec("still = Vec2(1, 0):length()").unwrap();
    assert_eq!(lua.get_global::<f64>("still").unwrap(), 1.0);
}

#[test]
fn test_reserved_metamethods_are_rejected() {
    let lua = Lua::new().unwrap();

    let err = lua
        .bind::<Counter>()
        .unwrap()
        .add_metamethod("__index", |_: &Counter| 0)
        .err()
        .unwrap();
    assert!(matches!(
        err,
        Error::Registration(RegistrationError::ReservedMetamethod { .. })
    ));
}

thread_local! {
    static DROPS: Cell<usize> = const { Cell::new(0) };
}

#[derive(UserType)]
struct Tracked {
    _label: String,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        DROPS.with(|drops| drops.set(drops.get() + 1));
    }
}

#[test]
fn test_destructor_runs_on_collection_and_close() {
    DROPS.with(|drops| drops.set(0));
    let lua = Lua::new().unwrap();
    lua.bind::<Tracked>()
        .unwrap()
        .add_constructor(|| Tracked {
            _label: String::from("tracked"),
        })
        .unwrap();
    assert!(lua.type_descriptor("Tracked").unwrap().has_destructor());

    lua.exec("do local temp = Tracked() end kept = Tracked()").unwrap();
    lua.gc_collect();
    assert_eq!(DROPS.with(Cell::get), 1);

    drop(lua);
    assert_eq!(DROPS.with(Cell::get), 2);
}

#[test]
fn test_plain_data_has_no_destructor() {
    let lua = Lua::new().unwrap();
    bind_vec2(&lua);

    assert!(!lua.type_descriptor("Vec2").unwrap().has_destructor());
}

#[test]
fn test_type_function_override() {
    let lua = Lua::with_config(Config::default().with_type_function(true)).unwrap();
    bind_vec2(&lua);
    lua.exec(
        r#"
        bound = type(Vec2(1, 2))
        number = type(5)
        table = type({})
        file = type(io.stdout)
        "#,
    )
    .unwrap();

    assert_eq!(lua.get_global::<String>("bound").unwrap(), "Vec2");
    assert_eq!(lua.get_global::<String>("number").unwrap(), "number");
    assert_eq!(lua.get_global::<String>("table").unwrap(), "table");
    assert_eq!(lua.get_global::<String>("file").unwrap(), "userdata");
}

#[test]
fn test_builtin_type_function_by_default() {
    let lua = Lua::new().unwrap();
    bind_vec2(&lua);
    lua.exec("bound = type(Vec2(1, 2))").unwrap();

    assert_eq!(lua.get_global::<String>("bound").unwrap(), "userdata");
}
